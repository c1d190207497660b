//! The socket connection for one authenticated session.
//!
//! A supervisor task owns the live link: it connects (retrying with a fixed
//! delay), announces the identity, pumps inbound frames to subscribers and
//! reconnects when the link drops. Outbound frames go through an unbounded
//! channel to the transport's writer task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::ReconnectPolicy;
use crate::error::ConnectionError;
use crate::messages::{ClientEvent, DeletionNotice, EventKind, OutgoingMessage, ServerEvent};

/// Both directions of an open socket, as text frames.
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<SocketLink, ConnectionError>;
}

/// WebSocket transport.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<SocketLink, ConnectionError> {
        let (ws_stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| ConnectionError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(Message::text(frame)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Received close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(SocketLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// In-process transport. Every accepted connection hands its far end to the
/// receiver returned by [`LoopbackConnector::new`].
pub struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<RemoteEnd>,
    refusals: AtomicU32,
    attempts: AtomicU32,
}

pub struct RemoteEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<String>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = LoopbackConnector {
            accepted,
            refusals: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        };
        (connector, rx)
    }

    /// Makes the next `count` connection attempts fail.
    pub fn refuse_next(&self, count: u32) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, endpoint: &str) -> Result<SocketLink, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectionError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(RemoteEnd {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| ConnectionError::Closed)?;

        Ok(SocketLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

impl RemoteEnd {
    /// Next frame the client emitted, decoded as JSON.
    pub async fn next_frame(&mut self) -> Option<serde_json::Value> {
        let frame = self.from_client.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    pub fn push(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.to_client.send(frame).is_ok(),
            Err(_) => false,
        }
    }

    pub fn push_raw(&self, frame: &str) -> bool {
        self.to_client.send(frame.to_string()).is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving half of a listener registration. Events arrive in the order
/// the socket delivered them.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// `None` once the listener is removed or the manager disconnects.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

struct Listener {
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Shared {
    link: RwLock<Option<mpsc::UnboundedSender<String>>>,
    identity: RwLock<Option<String>>,
    listeners: RwLock<HashMap<SubscriptionId, Listener>>,
    next_id: AtomicU64,
    /// Bumped by every disconnect. A supervisor started under an older value
    /// must not install its link.
    epoch: AtomicU64,
}

impl Shared {
    async fn dispatch_frame(&self, frame: &str) {
        match ServerEvent::from_frame(frame) {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => warn!("Dropping unrecognised frame {}: {}", frame, e),
        }
    }

    async fn dispatch(&self, event: &ServerEvent) {
        let kind = event.kind();
        let mut listeners = self.listeners.write().await;
        listeners.retain(|id, listener| {
            if !listener.kinds.contains(&kind) {
                return true;
            }
            let delivered = listener.tx.send(event.clone()).is_ok();
            if !delivered {
                debug!("Pruning dropped subscription {:?}", id);
            }
            delivered
        });
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        ConnectionManager {
            connector,
            policy,
            shared: Arc::new(Shared::default()),
            supervisor: std::sync::Mutex::new(None),
        }
    }

    /// Opens the socket for `identity_id`. When already connected this only
    /// re-announces the identity.
    pub async fn connect(&self, endpoint: &str, identity_id: &str) {
        *self.shared.identity.write().await = Some(identity_id.to_string());

        if self.is_connected().await {
            info!("Socket already connected, announcing {}", identity_id);
            self.emit(ClientEvent::UserConnected(identity_id.to_string())).await;
            return;
        }

        let Ok(mut supervisor) = self.supervisor.lock() else {
            error!("Connection supervisor lock poisoned");
            return;
        };
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Connection attempt already underway for {}", endpoint);
            return;
        }

        *supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            endpoint.to_string(),
            self.policy,
            self.shared.epoch.load(Ordering::SeqCst),
        )));
    }

    /// Tears down the socket and drops every registered listener.
    pub async fn disconnect(&self) {
        {
            let mut link = self.shared.link.write().await;
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            link.take();
        }
        self.stop_supervisor();
        self.shared.identity.write().await.take();
        self.shared.listeners.write().await.clear();
        info!("Socket disconnected");
    }

    fn stop_supervisor(&self) {
        if let Ok(mut supervisor) = self.supervisor.lock() {
            if let Some(handle) = supervisor.take() {
                handle.abort();
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.shared
            .link
            .read()
            .await
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    /// Returns false instead of failing when there is no live socket.
    pub async fn emit(&self, event: ClientEvent) -> bool {
        let link = self.shared.link.read().await;
        let Some(outbound) = link.as_ref() else {
            warn!("Socket not connected, dropping {}", event.name());
            return false;
        };
        match event.to_frame() {
            Ok(frame) => outbound.send(frame).is_ok(),
            Err(e) => {
                error!("Failed to encode {}: {}", event.name(), e);
                false
            }
        }
    }

    pub async fn add_listener(&self, kind: EventKind) -> Subscription {
        self.subscribe(&[kind]).await
    }

    /// One subscription covering several kinds, delivered in arrival order.
    pub async fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.write().await.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                tx,
            },
        );
        Subscription { id, rx }
    }

    /// Unknown ids are ignored.
    pub async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.write().await.remove(&id).is_some()
    }

    pub async fn listener_count(&self) -> usize {
        self.shared.listeners.read().await.len()
    }

    pub async fn send_message(&self, recipient_id: &str, text: &str, sender_id: &str) -> bool {
        self.emit(ClientEvent::SendMessage(OutgoingMessage {
            recipient_id: recipient_id.to_string(),
            message: text.to_string(),
            sender_id: sender_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }))
        .await
    }

    pub async fn notify_deletion(&self, notice: DeletionNotice) -> bool {
        self.emit(ClientEvent::DeleteMessage(notice)).await
    }

    pub async fn start_typing(&self, recipient_id: &str) -> bool {
        self.emit(ClientEvent::TypingStart(recipient_id.to_string())).await
    }

    pub async fn stop_typing(&self, recipient_id: &str) -> bool {
        self.emit(ClientEvent::TypingStop(recipient_id.to_string())).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_supervisor();
    }
}

async fn supervise(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    endpoint: String,
    policy: ReconnectPolicy,
    epoch: u64,
) {
    let mut reconnecting = false;
    loop {
        let Some(SocketLink { outbound, mut inbound }) =
            open_with_retry(connector.as_ref(), &endpoint, policy, reconnecting).await
        else {
            warn!(
                "Giving up on {} after {} attempts",
                endpoint,
                policy.max_attempts.max(1)
            );
            return;
        };

        {
            let mut link = shared.link.write().await;
            if shared.epoch.load(Ordering::SeqCst) != epoch {
                debug!("Manager disconnected while connecting to {}, dropping link", endpoint);
                return;
            }
            if let Some(identity) = shared.identity.read().await.clone() {
                debug!("Announcing {} on new connection", identity);
                match ClientEvent::UserConnected(identity).to_frame() {
                    Ok(frame) => {
                        let _ = outbound.send(frame);
                    }
                    Err(e) => error!("Failed to encode identity announcement: {}", e),
                }
            }
            *link = Some(outbound);
        }
        info!("Socket connected to {}", endpoint);

        while let Some(frame) = inbound.recv().await {
            shared.dispatch_frame(&frame).await;
        }

        {
            let mut link = shared.link.write().await;
            if shared.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            link.take();
        }
        warn!("Socket to {} dropped", endpoint);
        reconnecting = true;
    }
}

async fn open_with_retry(
    connector: &dyn Connector,
    endpoint: &str,
    policy: ReconnectPolicy,
    reconnecting: bool,
) -> Option<SocketLink> {
    for attempt in 1..=policy.max_attempts.max(1) {
        if attempt > 1 || reconnecting {
            tokio::time::sleep(policy.delay).await;
        }
        match connector.open(endpoint).await {
            Ok(link) => return Some(link),
            Err(e) => warn!("Connection attempt {} failed: {}", attempt, e),
        }
    }
    None
}
