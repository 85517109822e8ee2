//! Node identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stable identifier for a node on the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a new random peer ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a PeerId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Capabilities advertised by default in `node_announce`.
pub const DEFAULT_CAPABILITIES: &[&str] = &["chat", "resource_share", "knowledge_sync"];

/// Who this node is: its id plus the capabilities it advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub peer_id: PeerId,
    pub capabilities: Vec<String>,
}

impl NodeIdentity {
    /// Identity with an operator-chosen id (e.g. `"node1"`).
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            peer_id: PeerId::from_string(id),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Identity with a fresh random id.
    pub fn generate() -> Self {
        Self {
            peer_id: PeerId::generate(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Replace the advertised capabilities.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generation() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let id = PeerId::from_string("node1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"node1\"");
        assert_eq!(format!("{id}"), "node1");
    }

    #[test]
    fn test_named_identity() {
        let identity = NodeIdentity::named("node1").with_capabilities(["compute"]);
        assert_eq!(identity.peer_id.as_str(), "node1");
        assert_eq!(identity.capabilities, vec!["compute".to_string()]);
    }

    #[test]
    fn test_generated_identity_has_default_capabilities() {
        let identity = NodeIdentity::generate();
        assert_eq!(identity.capabilities.len(), DEFAULT_CAPABILITIES.len());
    }
}
