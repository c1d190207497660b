#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_client::api::{AuthResponse, ChatApi, ImageUpload};
use chat_client::connection::{LoopbackConnector, RemoteEnd};
use chat_client::error::ApiError;
use chat_client::models::{MessageRecord, User, UserRecord};
use chat_client::session::{Credentials, Registration};
use chat_client::token_store::MemoryTokenStore;
use chat_client::{ChatClient, ClientConfig};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

pub const TOKEN: &str = "token-1";
pub const ME: &str = "me";

#[derive(Default)]
pub struct FakeApi {
    pub history: Mutex<HashMap<String, Vec<MessageRecord>>>,
    pub users: Mutex<Vec<UserRecord>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
    pub images: Mutex<Vec<(String, usize)>>,
    pub fail_sends: AtomicBool,
    pub expired: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    fn check_token(&self, token: &str) -> Result<(), ApiError> {
        if self.expired.load(Ordering::SeqCst) || token != TOKEN {
            return Err(ApiError::SessionExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        if credentials.password != "secret1" {
            return Err(ApiError::Rejected {
                status: 401,
                message: "Invalid credentials".to_string(),
            });
        }
        Ok(AuthResponse {
            token: Some(TOKEN.to_string()),
            user: Some(User {
                id: ME.to_string(),
                name: "Me".to_string(),
                email: credentials.email.clone(),
            }),
        })
    }

    async fn sign_up(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        Ok(AuthResponse {
            token: None,
            user: Some(User {
                id: "new".to_string(),
                name: registration.name.clone(),
                email: registration.email.clone(),
            }),
        })
    }

    async fn fetch_users(&self, token: &str) -> Result<Vec<UserRecord>, ApiError> {
        self.check_token(token)?;
        Ok(self.users.lock().unwrap().clone())
    }

    async fn fetch_messages(&self, token: &str, peer_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_token(token)?;
        Ok(self.history.lock().unwrap().get(peer_id).cloned().unwrap_or_default())
    }

    async fn send_message(&self, token: &str, receiver_id: &str, text: &str) -> Result<Value, ApiError> {
        self.check_token(token)?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                status: 500,
                message: "Failed to send message".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((receiver_id.to_string(), text.to_string()));
        Ok(json!({ "success": true }))
    }

    async fn send_image(&self, token: &str, receiver_id: &str, image: ImageUpload) -> Result<Value, ApiError> {
        self.check_token(token)?;
        self.images
            .lock()
            .unwrap()
            .push((receiver_id.to_string(), image.bytes.len()));
        Ok(json!({ "success": true }))
    }

    async fn delete_message(&self, token: &str, message_id: &str) -> Result<(), ApiError> {
        self.check_token(token)?;
        self.deleted.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub client: Arc<ChatClient>,
    pub api: Arc<FakeApi>,
    pub tokens: Arc<MemoryTokenStore>,
    pub connector: Arc<LoopbackConnector>,
    pub accepted: mpsc::UnboundedReceiver<RemoteEnd>,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        socket_url: "loopback".to_string(),
        reconnect_attempts: 2,
        reconnect_delay_ms: 5,
        typing_idle_ms: 30,
        ..ClientConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with_tokens(MemoryTokenStore::new())
}

pub fn harness_with_tokens(tokens: MemoryTokenStore) -> Harness {
    let api = Arc::new(FakeApi::default());
    let tokens = Arc::new(tokens);
    let (connector, accepted) = LoopbackConnector::new();
    let connector = Arc::new(connector);
    let client = Arc::new(ChatClient::new(
        test_config(),
        api.clone(),
        connector.clone(),
        tokens.clone(),
    ));
    Harness {
        client,
        api,
        tokens,
        connector,
        accepted,
    }
}

impl Harness {
    /// Logs in and returns the remote end after the identity announcement.
    pub async fn login(&mut self) -> RemoteEnd {
        self.client
            .login(&Credentials {
                email: "me@example.com".to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        let mut remote = self.accepted.recv().await.unwrap();
        let hello = remote.next_frame().await.unwrap();
        assert_eq!(hello, json!({"event": "user_connected", "data": ME}));
        let client = self.client.clone();
        eventually(|| {
            let client = client.clone();
            async move { client.is_connected().await }
        })
        .await;
        remote
    }
}

/// Polls `check` until it holds, failing the test after about two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn record(id: &str, sender: &str, text: &str) -> MessageRecord {
    MessageRecord {
        mongo_id: Some(id.to_string()),
        sender: Some(sender.to_string()),
        message: Some(text.to_string()),
        ..MessageRecord::default()
    }
}
