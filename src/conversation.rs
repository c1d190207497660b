//! Per-peer message timelines.
//!
//! Messages reach a conversation from three places: the optimistic local
//! send, the history fetch that runs when a conversation is opened, and push
//! delivery over the socket. Lists keep arrival order and are never sorted.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::ConversationError;
use crate::messages::{DeletionNotice, IncomingMessage, SendAck};
use crate::models::{Message, MessageBody, MessageRecord, MessageState, Origin};

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Vec<Message>>,
    pub loading: bool,
    pub fetching: bool,
    pub error: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, peer_id: &str) -> &[Message] {
        self.conversations.get(peer_id).map_or(&[], Vec::as_slice)
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.conversations.keys().map(String::as_str)
    }

    /// Appends a message the user just sent, before the network has seen it.
    pub fn append_local(
        &mut self,
        peer_id: &str,
        sender_id: &str,
        body: MessageBody,
    ) -> Result<Message, ConversationError> {
        if let MessageBody::Text(text) = &body {
            if text.trim().is_empty() {
                return Err(ConversationError::EmptyMessage);
            }
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            body,
            sender_id: sender_id.to_string(),
            timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            origin: Origin::LocalPending,
        };
        self.conversations
            .entry(peer_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// Replaces the whole timeline for `peer_id` with fetched history.
    ///
    /// Entries that were sent locally but not yet part of the fetched
    /// history are dropped.
    pub fn replace_history(&mut self, peer_id: &str, records: Vec<MessageRecord>) {
        let messages: Vec<Message> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| message_from_record(index, record))
            .collect();
        log::debug!("Loaded {} messages for {}", messages.len(), peer_id);
        self.conversations.insert(peer_id.to_string(), messages);
    }

    /// Absorbs a pushed message under its sender's timeline, whichever
    /// conversation is open. Returns false when the id is already present.
    pub fn absorb_push(&mut self, incoming: IncomingMessage) -> bool {
        let list = self.conversations.entry(incoming.sender_id.clone()).or_default();
        if let Some(id) = incoming.message_id.as_deref() {
            if list.iter().any(|m| m.answers_to(id)) {
                log::debug!("Ignoring duplicate push {} from {}", id, incoming.sender_id);
                return false;
            }
        }

        let body = match (incoming.message_type.as_deref(), incoming.image_url) {
            (Some("image"), Some(url)) => MessageBody::Image {
                url,
                caption: incoming.message.unwrap_or_default(),
            },
            _ => MessageBody::Text(incoming.message.unwrap_or_default()),
        };
        let id = incoming
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        list.push(Message {
            id,
            server_id: incoming.message_id,
            body,
            sender_id: incoming.sender_id,
            timestamp: incoming.timestamp,
            origin: Origin::Pushed,
        });
        true
    }

    /// Assigns the server id from a send acknowledgement to the oldest
    /// pending local message it matches.
    ///
    /// Matching is by recipient and, when the ack carries it, message text.
    pub fn confirm(&mut self, peer_id: &str, ack: &SendAck) -> bool {
        let Some(server_id) = ack.message_id.as_deref() else {
            return false;
        };
        let Some(list) = self.conversations.get_mut(peer_id) else {
            return false;
        };
        if list.iter().any(|m| m.server_id.as_deref() == Some(server_id)) {
            return false;
        }

        let candidate = list.iter_mut().find(|m| {
            m.origin == Origin::LocalPending
                && m.state() == MessageState::Pending
                && ack.message.as_deref().map_or(true, |text| m.body.text() == text)
        });
        match candidate {
            Some(message) => {
                message.server_id = Some(server_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Removes a message the user deleted and returns the notice to send to
    /// the peer. The notice names the server id when one is known.
    pub fn delete_local(&mut self, peer_id: &str, message_id: &str) -> Option<DeletionNotice> {
        let list = self.conversations.get_mut(peer_id)?;
        let position = list.iter().position(|m| m.answers_to(message_id))?;
        let removed = list.remove(position);
        Some(DeletionNotice {
            recipient_id: peer_id.to_string(),
            message_id: removed.authoritative_id().to_string(),
        })
    }

    pub fn apply_remote_deletion(&mut self, peer_id: &str, message_id: &str) -> bool {
        let Some(list) = self.conversations.get_mut(peer_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| !m.answers_to(message_id));
        before != list.len()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.loading = false;
        self.fetching = false;
        self.error = None;
    }
}

fn message_from_record(index: usize, record: MessageRecord) -> Message {
    let server_id = record.mongo_id.or(record.message_id);
    let id = server_id.clone().unwrap_or_else(|| format!("msg_{index}"));
    let text = record.message.or(record.text).unwrap_or_default();
    let body = match (record.message_type.as_deref(), record.image_url) {
        (Some("image"), Some(url)) => MessageBody::Image { url, caption: text },
        _ => MessageBody::Text(text),
    };

    Message {
        id,
        server_id,
        body,
        sender_id: record.sender.unwrap_or_default(),
        timestamp: record.timestamp,
        origin: Origin::Fetched,
    }
}
