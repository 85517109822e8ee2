//! Typed payloads for the built-in message types.
//!
//! Messages carry `serde_json::Value` payloads; these structs give the
//! well-known types a shape, with helpers to build and parse them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::identity::PeerId;
use crate::resource::Resource;

fn parse<T: DeserializeOwned>(value: &serde_json::Value, what: &str) -> Result<T, HandlerError> {
    serde_json::from_value(value.clone())
        .map_err(|e| HandlerError::InvalidPayload(format!("{what}: {e}")))
}

fn to_value<T: Serialize>(payload: &T) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// node_announce
// ---------------------------------------------------------------------------

/// A node advertising where it can be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnnouncePayload {
    pub fn new(node_id: &PeerId, host: impl Into<String>, port: u16, capabilities: Vec<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            host: host.into(),
            port,
            capabilities,
            timestamp: Utc::now(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_string(self.node_id.clone())
    }

    pub fn into_value(self) -> serde_json::Value {
        to_value(&self)
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self, HandlerError> {
        parse(value, "node_announce")
    }
}

// ---------------------------------------------------------------------------
// chat_message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        to_value(&self)
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self, HandlerError> {
        parse(value, "chat_message")
    }
}

// ---------------------------------------------------------------------------
// node_leave
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeavePayload {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LeavePayload {
    pub fn new(node_id: &PeerId) -> Self {
        Self {
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_string(self.node_id.clone())
    }

    pub fn into_value(self) -> serde_json::Value {
        to_value(&self)
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self, HandlerError> {
        parse(value, "node_leave")
    }
}

// ---------------------------------------------------------------------------
// resource_announce
// ---------------------------------------------------------------------------

/// A resource published to the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAnnouncePayload {
    pub resource_id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ResourceAnnouncePayload {
    /// New resource with an id derived from its type and a fresh UUID.
    pub fn new(resource_type: impl Into<String>, data: serde_json::Value) -> Self {
        let resource_type = resource_type.into();
        Self {
            resource_id: format!("{resource_type}_{}", uuid::Uuid::new_v4().simple()),
            resource_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn into_resource(self, source: PeerId) -> Resource {
        Resource {
            id: self.resource_id,
            resource_type: self.resource_type,
            data: self.data,
            source,
            timestamp: self.timestamp,
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        to_value(&self)
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self, HandlerError> {
        parse(value, "resource_announce")
    }
}

// ---------------------------------------------------------------------------
// knowledge_update
// ---------------------------------------------------------------------------

/// Codex entries, known nodes and resource ids shared between nodes.
///
/// The core never interprets these; they are queued for the application
/// unless it registers a `knowledge_update` handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUpdatePayload {
    pub node_id: String,
    #[serde(default)]
    pub codex: Vec<String>,
    #[serde(default)]
    pub known_nodes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    /// Anything else the application wants to ship (glyph tables etc).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl KnowledgeUpdatePayload {
    pub fn new(node_id: &PeerId) -> Self {
        Self {
            node_id: node_id.to_string(),
            ..Self::default()
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        to_value(&self)
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self, HandlerError> {
        parse(value, "knowledge_update")
    }
}
