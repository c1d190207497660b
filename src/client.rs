//! Session-scoped wiring of the stores, the REST API and the socket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::api::{ChatApi, HttpApi, ImageUpload};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, Connector, Subscription, WsConnector};
use crate::conversation::ConversationStore;
use crate::directory::Directory;
use crate::error::{ApiError, ClientError};
use crate::messages::{DeletionNotice, EventKind, ServerEvent};
use crate::models::{Message, MessageBody, Peer, PeerStatus};
use crate::presence::PresenceTracker;
use crate::session::{Credentials, Registration, Session, SessionStore};
use crate::token_store::{FileTokenStore, TokenStore};

/// The stores inbound socket events are applied to.
#[derive(Clone, Default)]
struct EventSink {
    presence: Arc<RwLock<PresenceTracker>>,
    conversations: Arc<RwLock<ConversationStore>>,
}

impl EventSink {
    async fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(incoming) => {
                debug!("Message from {}", incoming.sender_id);
                self.conversations.write().await.absorb_push(incoming);
            }
            ServerEvent::MessageSent(ack) => {
                let Some(peer_id) = ack.recipient_id.clone() else {
                    debug!("Send acknowledgement without recipient, ignoring");
                    return;
                };
                self.conversations.write().await.confirm(&peer_id, &ack);
            }
            ServerEvent::UserOnline(peer_id) => self.presence.write().await.peer_online(&peer_id),
            ServerEvent::UserOffline(peer_id) => self.presence.write().await.peer_offline(&peer_id),
            ServerEvent::OnlineUsersList(peer_ids) => self.presence.write().await.snapshot(peer_ids),
            ServerEvent::UserTyping(peer_id) => self.presence.write().await.typing_started(&peer_id),
            ServerEvent::UserStoppedTyping(peer_id) => {
                self.presence.write().await.typing_stopped(&peer_id);
            }
            ServerEvent::MessageDeleted(deletion) => {
                self.conversations
                    .write()
                    .await
                    .apply_remote_deletion(&deletion.deleted_by, &deletion.message_id);
            }
        }
    }
}

pub struct ChatClient {
    config: ClientConfig,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn Connector>,
    session: RwLock<SessionStore>,
    sink: EventSink,
    directory: RwLock<Directory>,
    connection: RwLock<Option<Arc<ConnectionManager>>>,
    router: std::sync::Mutex<Option<JoinHandle<()>>>,
    typing_timers: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        ChatClient {
            config,
            api,
            connector,
            session: RwLock::new(SessionStore::new(tokens)),
            sink: EventSink::default(),
            directory: RwLock::new(Directory::new()),
            connection: RwLock::new(None),
            router: std::sync::Mutex::new(None),
            typing_timers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// HTTP API, WebSocket transport and a token file under `data_dir`.
    pub async fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let api = Arc::new(HttpApi::new(&config.api_base_url));
        let tokens = Arc::new(FileTokenStore::new(&config.data_dir).await?);
        Ok(Self::new(config, api, Arc::new(WsConnector), tokens))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ---- session ------------------------------------------------------

    /// Returns whether a persisted token was found.
    pub async fn restore_session(&self) -> Result<bool, ClientError> {
        let restored = self.session.write().await.restore().await?;
        if restored {
            self.start_connection().await;
        }
        Ok(restored)
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        credentials.validate()?;
        let auth = self.api.sign_in(credentials).await?;
        let token = auth
            .token
            .ok_or_else(|| ApiError::Decode("sign-in response carried no token".to_string()))?;

        let (session, replaced) = {
            let mut sessions = self.session.write().await;
            let replaced = sessions.is_authenticated();
            sessions.establish(auth.user, token).await?;
            let session = sessions.current().cloned().ok_or(ClientError::NotAuthenticated)?;
            (session, replaced)
        };
        if replaced {
            self.leave_previous_session().await;
        }
        info!("Logged in as {}", session.identity_id().unwrap_or("<unknown>"));
        self.start_connection().await;
        Ok(session)
    }

    /// Returns the new session, or `None` when the backend created the
    /// account without signing it in.
    pub async fn signup(&self, registration: &Registration) -> Result<Option<Session>, ClientError> {
        registration.validate()?;
        let auth = self.api.sign_up(registration).await?;
        let Some(token) = auth.token else {
            info!("Account created, sign in to continue");
            return Ok(None);
        };

        let (session, replaced) = {
            let mut sessions = self.session.write().await;
            let replaced = sessions.is_authenticated();
            sessions.establish(auth.user, token).await?;
            (sessions.current().cloned(), replaced)
        };
        if replaced {
            self.leave_previous_session().await;
        }
        self.start_connection().await;
        Ok(session)
    }

    /// Ends the session: the socket and presence go first, then the
    /// conversation and directory state.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.session.write().await.logout().await;

        self.stop_connection().await;
        self.clear_stores().await;
        info!("Logged out");

        result.map_err(Into::into)
    }

    /// Drops what the previous user saw when a new sign-in replaces a live
    /// session.
    async fn leave_previous_session(&self) {
        debug!("Replacing an active session");
        self.stop_connection().await;
        self.clear_stores().await;
    }

    async fn clear_stores(&self) {
        self.sink.presence.write().await.clear();
        self.sink.conversations.write().await.clear();
        self.directory.write().await.clear();
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.current().cloned()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_authenticated()
    }

    async fn authorized(&self) -> Result<(String, u64), ClientError> {
        let sessions = self.session.read().await;
        let token = sessions.token().ok_or(ClientError::NotAuthenticated)?;
        Ok((token.to_string(), sessions.generation()))
    }

    async fn identity_id(&self) -> String {
        self.session
            .read()
            .await
            .current()
            .and_then(Session::identity_id)
            .unwrap_or_default()
            .to_string()
    }

    /// Expired sessions force a logout before the error is handed back.
    async fn fail(&self, err: ApiError) -> ClientError {
        if matches!(err, ApiError::SessionExpired) {
            warn!("Session expired, logging out");
            if let Err(logout_err) = self.logout().await {
                warn!("Logout after expiry failed: {}", logout_err);
            }
        }
        err.into()
    }

    // ---- connection ---------------------------------------------------

    async fn start_connection(&self) {
        self.stop_connection().await;

        let identity = self.identity_id().await;
        if identity.is_empty() {
            info!("Identity unknown for this session, realtime updates start after sign-in");
            return;
        }

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&self.connector),
            self.config.reconnect_policy(),
        ));
        let subscription = manager.subscribe(&EventKind::ALL).await;
        self.replace_task(&self.router, Some(spawn_router(subscription, self.sink.clone())));
        manager.connect(&self.config.socket_url, &identity).await;
        *self.connection.write().await = Some(manager);
    }

    async fn stop_connection(&self) {
        self.cancel_typing_timers();
        if let Some(manager) = self.connection.write().await.take() {
            manager.disconnect().await;
        }
        self.replace_task(&self.router, None);
    }

    fn cancel_typing_timers(&self) {
        if let Ok(mut timers) = self.typing_timers.lock() {
            for (_, timer) in timers.drain() {
                timer.abort();
            }
        }
    }

    /// Arms (`Some`) or cancels (`None`) the stop timer for one peer.
    fn replace_typing_timer(&self, peer_id: &str, timer: Option<JoinHandle<()>>) {
        let Ok(mut timers) = self.typing_timers.lock() else {
            return;
        };
        let previous = match timer {
            Some(timer) => timers.insert(peer_id.to_string(), timer),
            None => timers.remove(peer_id),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn replace_task(&self, slot: &std::sync::Mutex<Option<JoinHandle<()>>>, task: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = slot.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            *slot = task;
        }
    }

    async fn connection(&self) -> Option<Arc<ConnectionManager>> {
        self.connection.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        match self.connection().await {
            Some(manager) => manager.is_connected().await,
            None => false,
        }
    }

    /// Extra listener for a UI layer, alongside the client's own routing.
    pub async fn subscribe(&self, kinds: &[EventKind]) -> Option<Subscription> {
        Some(self.connection().await?.subscribe(kinds).await)
    }

    /// Applies an inbound event as if it had arrived on the socket.
    pub async fn apply_event(&self, event: ServerEvent) {
        self.sink.apply(event).await;
    }

    // ---- directory ----------------------------------------------------

    pub async fn refresh_directory(&self) -> Result<Vec<Peer>, ClientError> {
        let (token, generation) = self.authorized().await?;
        {
            let mut directory = self.directory.write().await;
            directory.loading = true;
            directory.error = None;
        }

        let result = self.api.fetch_users(&token).await;

        let sessions = self.session.read().await;
        if sessions.generation() != generation {
            debug!("Discarding directory fetched under an older session");
            self.directory.write().await.loading = false;
            return Err(ClientError::Stale);
        }
        let mut directory = self.directory.write().await;
        directory.loading = false;
        match result {
            Ok(records) => {
                directory.replace(records);
                Ok(directory.peers().to_vec())
            }
            Err(e) => {
                directory.error = Some(e.to_string());
                drop(directory);
                drop(sessions);
                Err(self.fail(e).await)
            }
        }
    }

    /// Peers with their presence-adjusted status.
    pub async fn peers(&self) -> Vec<(Peer, PeerStatus)> {
        let directory = self.directory.read().await;
        let presence = self.sink.presence.read().await;
        directory
            .peers()
            .iter()
            .map(|peer| (peer.clone(), Directory::effective_status(peer, &presence)))
            .collect()
    }

    pub async fn online_ids(&self) -> HashSet<String> {
        self.sink.presence.read().await.online_ids().clone()
    }

    pub async fn is_online(&self, peer_id: &str) -> bool {
        self.sink.presence.read().await.is_online(peer_id)
    }

    pub async fn is_typing(&self, peer_id: &str) -> bool {
        self.sink.presence.read().await.is_typing(peer_id)
    }

    // ---- conversations ------------------------------------------------

    /// Fetches the history for `peer_id` and replaces its timeline.
    pub async fn open_conversation(&self, peer_id: &str) -> Result<Vec<Message>, ClientError> {
        let (token, generation) = self.authorized().await?;
        {
            let mut conversations = self.sink.conversations.write().await;
            conversations.fetching = true;
            conversations.error = None;
        }

        let result = self.api.fetch_messages(&token, peer_id).await;

        let sessions = self.session.read().await;
        if sessions.generation() != generation {
            debug!("Discarding history for {} fetched under an older session", peer_id);
            self.sink.conversations.write().await.fetching = false;
            return Err(ClientError::Stale);
        }
        let mut conversations = self.sink.conversations.write().await;
        conversations.fetching = false;
        match result {
            Ok(records) => {
                conversations.replace_history(peer_id, records);
                Ok(conversations.messages(peer_id).to_vec())
            }
            Err(e) => {
                conversations.error = Some(e.to_string());
                drop(conversations);
                drop(sessions);
                Err(self.fail(e).await)
            }
        }
    }

    pub async fn messages(&self, peer_id: &str) -> Vec<Message> {
        self.sink.conversations.read().await.messages(peer_id).to_vec()
    }

    pub async fn is_fetching(&self) -> bool {
        self.sink.conversations.read().await.fetching
    }

    pub async fn is_loading(&self) -> bool {
        self.sink.conversations.read().await.loading
    }

    pub async fn conversation_error(&self) -> Option<String> {
        self.sink.conversations.read().await.error.clone()
    }

    pub async fn clear_conversation_error(&self) {
        self.sink.conversations.write().await.clear_error();
    }

    /// Shows the message right away, then delivers it over the socket and
    /// persists it over REST. A failed REST call leaves the message in place.
    pub async fn send_text(&self, peer_id: &str, text: &str) -> Result<Message, ClientError> {
        let (token, generation) = self.authorized().await?;
        let sender_id = self.identity_id().await;
        let message = {
            let mut conversations = self.sink.conversations.write().await;
            let message = conversations.append_local(peer_id, &sender_id, MessageBody::Text(text.to_string()))?;
            conversations.loading = true;
            conversations.error = None;
            message
        };

        self.stop_typing(peer_id).await;
        if let Some(manager) = self.connection().await {
            if !manager.send_message(peer_id, text, &sender_id).await {
                debug!("Realtime delivery to {} skipped, socket down", peer_id);
            }
        }

        let result = self.api.send_message(&token, peer_id, text).await;
        self.settle(generation, result.as_ref().err()).await;
        match result {
            Ok(_) => Ok(message),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// `local_uri` is what the timeline shows until the upload is confirmed.
    pub async fn send_image(&self, peer_id: &str, image: ImageUpload, local_uri: &str) -> Result<Message, ClientError> {
        let (token, generation) = self.authorized().await?;
        let sender_id = self.identity_id().await;
        let message = {
            let mut conversations = self.sink.conversations.write().await;
            let body = MessageBody::Image {
                url: local_uri.to_string(),
                caption: String::new(),
            };
            let message = conversations.append_local(peer_id, &sender_id, body)?;
            conversations.loading = true;
            conversations.error = None;
            message
        };

        let result = self.api.send_image(&token, peer_id, image).await;
        self.settle(generation, result.as_ref().err()).await;
        match result {
            Ok(_) => Ok(message),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Removes the message locally, tells the peer, then deletes it on the
    /// backend. Returns `None` when the message was already gone.
    pub async fn delete_message(&self, peer_id: &str, message_id: &str) -> Result<Option<DeletionNotice>, ClientError> {
        let (token, generation) = self.authorized().await?;
        let notice = {
            let mut conversations = self.sink.conversations.write().await;
            let Some(notice) = conversations.delete_local(peer_id, message_id) else {
                debug!("Message {} already gone from {}", message_id, peer_id);
                return Ok(None);
            };
            conversations.loading = true;
            conversations.error = None;
            notice
        };

        if let Some(manager) = self.connection().await {
            manager.notify_deletion(notice.clone()).await;
        }

        let result = self.api.delete_message(&token, &notice.message_id).await;
        self.settle(generation, result.as_ref().err()).await;
        match result {
            Ok(()) => Ok(Some(notice)),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Settles the loading flag after a send or delete. The error is only
    /// recorded when the session is unchanged.
    async fn settle(&self, generation: u64, err: Option<&ApiError>) {
        let sessions = self.session.read().await;
        let mut conversations = self.sink.conversations.write().await;
        conversations.loading = false;
        if sessions.generation() == generation {
            conversations.error = err.map(ToString::to_string);
        }
    }

    // ---- typing -------------------------------------------------------

    /// Call on every edit of the input box for `peer_id`.
    pub async fn note_input(&self, peer_id: &str, text: &str) {
        let Some(manager) = self.connection().await else {
            return;
        };
        if text.is_empty() {
            self.replace_typing_timer(peer_id, None);
            manager.stop_typing(peer_id).await;
            return;
        }

        manager.start_typing(peer_id).await;
        let idle = self.config.typing_idle();
        let peer = peer_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            manager.stop_typing(&peer).await;
        });
        self.replace_typing_timer(peer_id, Some(timer));
    }

    pub async fn stop_typing(&self, peer_id: &str) {
        self.replace_typing_timer(peer_id, None);
        if let Some(manager) = self.connection().await {
            manager.stop_typing(peer_id).await;
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.cancel_typing_timers();
        self.replace_task(&self.router, None);
    }
}

fn spawn_router(mut subscription: Subscription, sink: EventSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            sink.apply(event).await;
        }
        debug!("Event router stopped");
    })
}
