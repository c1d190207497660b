use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The authenticated identity as returned by sign-in and sign-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// A directory entry exactly as the users endpoint returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "_id", default, deserialize_with = "opt_string_or_number")]
    pub mongo_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A stored message exactly as the history endpoint returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "_id", default, deserialize_with = "opt_string_or_number")]
    pub mongo_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Away,
    Offline,
}

impl PeerStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(PeerStatus::Online),
            "away" => Some(PeerStatus::Away),
            "offline" => Some(PeerStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Image { url: String, caption: String },
}

impl MessageBody {
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Text(text) => text,
            MessageBody::Image { caption, .. } => caption,
        }
    }
}

/// Where a message in a conversation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    LocalPending,
    Fetched,
    Pushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub server_id: Option<String>,
    pub body: MessageBody,
    pub sender_id: String,
    pub timestamp: Option<String>,
    pub origin: Origin,
}

impl Message {
    pub fn state(&self) -> MessageState {
        if self.server_id.is_some() {
            MessageState::Confirmed
        } else {
            MessageState::Pending
        }
    }

    /// True when `id` names this message by either its local or server id.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.server_id.as_deref() == Some(id)
    }

    /// The id the remote side knows this message by.
    pub fn authoritative_id(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.id)
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(value).ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(value_to_string))
}
