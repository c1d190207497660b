//! Socket event vocabulary.
//!
//! Every frame on the socket is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::models::{opt_string_or_number, string_or_number};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "user_connected")]
    UserConnected(String),
    #[serde(rename = "send_message")]
    SendMessage(OutgoingMessage),
    #[serde(rename = "delete_message")]
    DeleteMessage(DeletionNotice),
    #[serde(rename = "typing_start")]
    TypingStart(String),
    #[serde(rename = "typing_stop")]
    TypingStop(String),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::UserConnected(_) => "user_connected",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::TypingStart(_) => "typing_start",
            ClientEvent::TypingStop(_) => "typing_stop",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub recipient_id: String,
    pub message: String,
    pub sender_id: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub recipient_id: String,
    pub message_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receive_message")]
    ReceiveMessage(IncomingMessage),
    #[serde(rename = "message_sent")]
    MessageSent(SendAck),
    #[serde(rename = "user_online")]
    UserOnline(String),
    #[serde(rename = "user_offline")]
    UserOffline(String),
    #[serde(rename = "user_typing")]
    UserTyping(String),
    #[serde(rename = "user_stopped_typing")]
    UserStoppedTyping(String),
    #[serde(rename = "message_deleted")]
    MessageDeleted(RemoteDeletion),
    #[serde(rename = "online_users_list")]
    OnlineUsersList(Vec<String>),
}

impl ServerEvent {
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ReceiveMessage(_) => EventKind::ReceiveMessage,
            ServerEvent::MessageSent(_) => EventKind::MessageSent,
            ServerEvent::UserOnline(_) => EventKind::UserOnline,
            ServerEvent::UserOffline(_) => EventKind::UserOffline,
            ServerEvent::UserTyping(_) => EventKind::UserTyping,
            ServerEvent::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
            ServerEvent::MessageDeleted(_) => EventKind::MessageDeleted,
            ServerEvent::OnlineUsersList(_) => EventKind::OnlineUsersList,
        }
    }
}

/// Subscription categories, one per inbound event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReceiveMessage,
    MessageSent,
    UserOnline,
    UserOffline,
    UserTyping,
    UserStoppedTyping,
    MessageDeleted,
    OnlineUsersList,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ReceiveMessage,
        EventKind::MessageSent,
        EventKind::UserOnline,
        EventKind::UserOffline,
        EventKind::UserTyping,
        EventKind::UserStoppedTyping,
        EventKind::MessageDeleted,
        EventKind::OnlineUsersList,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ReceiveMessage => "receive_message",
            EventKind::MessageSent => "message_sent",
            EventKind::UserOnline => "user_online",
            EventKind::UserOffline => "user_offline",
            EventKind::UserTyping => "user_typing",
            EventKind::UserStoppedTyping => "user_stopped_typing",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::OnlineUsersList => "online_users_list",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub sender_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub timestamp: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDeletion {
    #[serde(deserialize_with = "string_or_number")]
    pub message_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub deleted_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_frames_use_event_and_data() {
        let frame = ClientEvent::UserConnected("u1".to_string()).to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "user_connected", "data": "u1"}));

        let frame = ClientEvent::DeleteMessage(DeletionNotice {
            recipient_id: "42".to_string(),
            message_id: "L1".to_string(),
        })
        .to_frame()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "delete_message", "data": {"recipientId": "42", "messageId": "L1"}})
        );
    }

    #[test]
    fn send_message_payload_is_camel_case() {
        let event = ClientEvent::SendMessage(OutgoingMessage {
            recipient_id: "7".to_string(),
            message: "hello".to_string(),
            sender_id: "1".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], "send_message");
        assert_eq!(value["data"]["recipientId"], "7");
        assert_eq!(value["data"]["senderId"], "1");
        assert_eq!(event.name(), "send_message");
    }

    #[test]
    fn parses_receive_message_with_missing_optionals() {
        let event = ServerEvent::from_frame(
            r#"{"event":"receive_message","data":{"senderId":"42","message":"hi","messageId":"m1"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ReceiveMessage(msg) => {
                assert_eq!(msg.sender_id, "42");
                assert_eq!(msg.message.as_deref(), Some("hi"));
                assert_eq!(msg.message_id.as_deref(), Some("m1"));
                assert!(msg.timestamp.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn accepts_numeric_ids_and_timestamps() {
        let event = ServerEvent::from_frame(
            r#"{"event":"receive_message","data":{"senderId":42,"message":"hi","messageId":"m1","timestamp":1700000000000}}"#,
        )
        .unwrap();
        let ServerEvent::ReceiveMessage(msg) = event else {
            panic!("expected receive_message");
        };
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.timestamp.as_deref(), Some("1700000000000"));

        let event = ServerEvent::from_frame(
            r#"{"event":"message_sent","data":{"messageId":17,"recipientId":"42","message":"hi"}}"#,
        )
        .unwrap();
        let ServerEvent::MessageSent(ack) = event else {
            panic!("expected message_sent");
        };
        assert_eq!(ack.message_id.as_deref(), Some("17"));

        let event = ServerEvent::from_frame(r#"{"event":"message_deleted","data":{"messageId":5,"deletedBy":42}}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::MessageDeleted(RemoteDeletion {
                message_id: "5".to_string(),
                deleted_by: "42".to_string(),
            })
        );
    }

    #[test]
    fn parses_presence_events() {
        let event = ServerEvent::from_frame(r#"{"event":"online_users_list","data":["7","9"]}"#).unwrap();
        assert_eq!(event, ServerEvent::OnlineUsersList(vec!["7".to_string(), "9".to_string()]));
        assert_eq!(event.kind(), EventKind::OnlineUsersList);

        let event = ServerEvent::from_frame(r#"{"event":"user_offline","data":"7"}"#).unwrap();
        assert_eq!(event, ServerEvent::UserOffline("7".to_string()));
        assert_eq!(event.kind().as_str(), "user_offline");
    }

    #[test]
    fn rejects_unknown_events() {
        assert!(ServerEvent::from_frame(r#"{"event":"room_created","data":{}}"#).is_err());
        assert!(ServerEvent::from_frame("not json").is_err());
    }
}
