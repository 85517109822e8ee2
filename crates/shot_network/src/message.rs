//! The message envelope carried across the mesh.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Hop budget given to new messages unless the caller picks one.
pub const DEFAULT_TTL: u32 = 5;

/// The type tag of a [`Message`], selecting its handler.
///
/// On the wire this is a plain string. Unknown tags become [`MessageKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// A node advertising its address and capabilities.
    NodeAnnounce,
    /// Human chat, flooded to everyone.
    ChatMessage,
    /// Clean departure notice; never forwarded.
    NodeLeave,
    /// A shared resource was published.
    ResourceAnnounce,
    /// Codex/glyph/peer knowledge exchange.
    KnowledgeUpdate,
    /// Application-defined type registered at runtime.
    Custom(String),
}

impl MessageKind {
    /// Build a kind from a tag, mapping known tags onto their variants.
    pub fn custom(tag: impl Into<String>) -> Self {
        Self::from(tag.into())
    }

    /// The wire tag, also used as the dispatch key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeAnnounce => "node_announce",
            Self::ChatMessage => "chat_message",
            Self::NodeLeave => "node_leave",
            Self::ResourceAnnounce => "resource_announce",
            Self::KnowledgeUpdate => "knowledge_update",
            Self::Custom(tag) => tag.as_str(),
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "node_announce" => Self::NodeAnnounce,
            "chat_message" => Self::ChatMessage,
            "node_leave" => Self::NodeLeave,
            "resource_announce" => Self::ResourceAnnounce,
            "knowledge_update" => Self::KnowledgeUpdate,
            _ => Self::Custom(tag),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Custom(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable network message.
///
/// `id` is minted once by the originating node and survives every hop, so
/// the seen-set on each node can recognise copies arriving over redundant
/// paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier (UUID v4).
    pub id: String,
    /// Node that created the message.
    pub sender_id: PeerId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Remaining hop budget.
    pub ttl: u32,
    /// Node that relayed this copy to us, if it was forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<PeerId>,
}

impl Message {
    /// Create a fresh message with the default TTL.
    pub fn new(sender_id: PeerId, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self::with_ttl(sender_id, kind, payload, DEFAULT_TTL)
    }

    /// Create a fresh message with an explicit hop budget.
    pub fn with_ttl(
        sender_id: PeerId,
        kind: MessageKind,
        payload: serde_json::Value,
        ttl: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            kind,
            payload,
            timestamp: Utc::now(),
            ttl,
            via: None,
        }
    }

    /// The copy `relay` should pass on, or `None` once the hop budget is spent.
    pub fn forwarded(&self, relay: &PeerId) -> Option<Message> {
        if self.ttl <= 1 {
            return None;
        }
        Some(Message {
            ttl: self.ttl - 1,
            via: Some(relay.clone()),
            ..self.clone()
        })
    }

    /// The node that handed us this copy: the relay if forwarded, else the origin.
    pub fn immediate_sender(&self) -> &PeerId {
        self.via.as_ref().unwrap_or(&self.sender_id)
    }

    /// Serialize the message body to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a message body from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
