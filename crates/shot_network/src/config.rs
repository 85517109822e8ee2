//! Network configuration for a shot node.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::PeerId;
use crate::message::DEFAULT_TTL;

/// Port range used when no listen port is configured.
pub const RANDOM_PORT_RANGE: std::ops::RangeInclusive<u16> = 50000..=60000;

/// A peer address supplied out-of-band to seed discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPeer {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
}

impl BootstrapPeer {
    pub fn new(peer_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            peer_id: PeerId::from_string(peer_id),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BootstrapPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.peer_id, self.host, self.port)
    }
}

/// Parses `id@host:port`.
impl FromStr for BootstrapPeer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| format!("expected id@host:port, got '{s}'"))?;
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in '{s}'"))?;
        if id.is_empty() || host.is_empty() {
            return Err(format!("empty id or host in '{s}'"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in '{s}': {e}"))?;
        Ok(Self::new(id, host.trim_start_matches('[').trim_end_matches(']'), port))
    }
}

/// Configuration for the shot networking layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host/interface to listen on.
    pub listen_host: String,

    /// Port to listen on. `None` picks a random port in [`RANDOM_PORT_RANGE`];
    /// `Some(0)` lets the OS choose.
    pub listen_port: Option<u16>,

    /// Host advertised to peers in `node_announce`. Defaults to the listen
    /// host, or loopback when listening on the unspecified address.
    pub advertise_host: Option<String>,

    /// Hop budget for messages originated by this node.
    pub default_ttl: u32,

    /// Peers not heard from within this window are pruned.
    #[serde(with = "duration_secs")]
    pub peer_stale_after: Duration,

    /// How long message ids stay in the seen-set.
    #[serde(with = "duration_secs")]
    pub seen_retention: Duration,

    /// Hard cap on seen-set entries.
    pub seen_capacity: usize,

    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    #[serde(with = "duration_millis")]
    pub write_timeout: Duration,

    /// Budget for reading one inbound frame.
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,

    /// Upper bound on the whole of `stop()`'s leave notice and task joins.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,

    /// Consecutive send failures after which a peer is dropped.
    pub max_send_failures: u32,

    /// Interval between maintenance passes. Each pass re-announces us to
    /// known peers, then prunes stale peers and expired message ids.
    #[serde(with = "duration_secs")]
    pub maintenance_interval: Duration,

    /// Minimum gap between attempts to rejoin through `bootstrap_peers`
    /// while the peer table is empty.
    #[serde(with = "duration_secs")]
    pub bootstrap_retry: Duration,

    /// Inbound messages processed concurrently; further frames wait.
    pub max_inflight: usize,

    /// Capacity of the default inbound queue.
    pub inbox_capacity: usize,

    /// Maximum resources kept in the catalog.
    pub resource_capacity: usize,

    /// Peers to seed discovery with.
    pub bootstrap_peers: Vec<BootstrapPeer>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: None,
            advertise_host: None,
            default_ttl: DEFAULT_TTL,
            peer_stale_after: Duration::from_secs(300),
            seen_retention: Duration::from_secs(600),
            seen_capacity: 10_000,
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            max_send_failures: 3,
            maintenance_interval: Duration::from_secs(30),
            bootstrap_retry: Duration::from_secs(30),
            max_inflight: 256,
            inbox_capacity: 1024,
            resource_capacity: 1024,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Config bound to loopback on an OS-assigned port. Handy for tests and
    /// local meshes.
    pub fn local() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: Some(0),
            ..Self::default()
        }
    }

    /// The port to bind, resolving `None` to a random port.
    pub fn resolve_port(&self) -> u16 {
        match self.listen_port {
            Some(port) => port,
            None => rand::rng().random_range(RANDOM_PORT_RANGE),
        }
    }

    /// Host peers should use to reach us.
    pub fn advertised_host(&self) -> String {
        if let Some(host) = &self.advertise_host {
            return host.clone();
        }
        match self.listen_host.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1".to_string(),
            other => other.to_string(),
        }
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetworkConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.default_ttl, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.write_timeout, Duration::from_secs(2));
        assert_eq!(config.max_send_failures, 3);
        assert!(config.listen_port.is_none());
        assert!(config.bootstrap_peers.is_empty());
        assert_eq!(config.bootstrap_retry, Duration::from_secs(30));
        assert_eq!(config.max_inflight, 256);
    }

    #[test]
    fn test_random_port_in_range() {
        let config = NetworkConfig::default();
        for _ in 0..32 {
            assert!(RANDOM_PORT_RANGE.contains(&config.resolve_port()));
        }
        assert_eq!(NetworkConfig::local().resolve_port(), 0);
    }

    #[test]
    fn test_advertised_host() {
        let mut config = NetworkConfig::default();
        assert_eq!(config.advertised_host(), "127.0.0.1");
        config.listen_host = "10.0.0.7".to_string();
        assert_eq!(config.advertised_host(), "10.0.0.7");
        config.advertise_host = Some("node.example".to_string());
        assert_eq!(config.advertised_host(), "node.example");
    }

    #[test]
    fn test_bootstrap_peer_parse() {
        let peer: BootstrapPeer = "node2@localhost:50001".parse().unwrap();
        assert_eq!(peer, BootstrapPeer::new("node2", "localhost", 50001));
        assert_eq!(peer.to_string(), "node2@localhost:50001");

        let v6: BootstrapPeer = "n@[::1]:7".parse().unwrap();
        assert_eq!(v6.host, "::1");

        assert!("localhost:50001".parse::<BootstrapPeer>().is_err());
        assert!("node2@localhost".parse::<BootstrapPeer>().is_err());
        assert!("node2@localhost:99999".parse::<BootstrapPeer>().is_err());
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = NetworkConfig::local();
        config.read_timeout = Duration::from_millis(750);
        config.bootstrap_peers = vec![BootstrapPeer::new("b", "127.0.0.1", 50001)];

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.listen_port, Some(0));
        assert_eq!(deserialized.read_timeout, Duration::from_millis(750));
        assert_eq!(deserialized.bootstrap_peers, config.bootstrap_peers);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: NetworkConfig = serde_json::from_str(r#"{"default_ttl": 2}"#).unwrap();
        assert_eq!(config.default_ttl, 2);
        assert_eq!(config.seen_capacity, 10_000);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut original = NetworkConfig::default();
        original.max_send_failures = 7;
        original.save_to_file(&path).unwrap();

        let loaded = NetworkConfig::load_or_default(&path);
        assert_eq!(loaded.max_send_failures, 7);
    }

    #[test]
    fn test_config_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetworkConfig::load_or_default(&dir.path().join("missing.json"));
        assert_eq!(config.inbox_capacity, 1024);
    }

    #[test]
    fn test_config_load_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = NetworkConfig::load_or_default(&path);
        assert_eq!(config.default_ttl, DEFAULT_TTL);
    }
}
