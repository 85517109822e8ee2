//! Peer table: Known peer addresses and liveness.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// What we know about one remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
    /// Last time we heard from (or about) this peer.
    pub last_seen: DateTime<Utc>,
    /// Capabilities from the peer's latest announce.
    pub capabilities: Vec<String>,
    /// Consecutive failed sends.
    pub failures: u32,
}

impl PeerRecord {
    /// `host:port` string suitable for logging and dialing.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        // A last_seen in the future (clock skew between callers) counts as fresh.
        (now - self.last_seen)
            .to_std()
            .map_or(true, |age| age <= stale_after)
    }
}

/// Thread-safe table of known peers, keyed by [`PeerId`].
///
/// Every method takes `&self` and holds the internal lock only for the
/// duration of the call, so the table can be shared freely between the
/// accept path and broadcast fan-out.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer or refresh its address and `last_seen`.
    ///
    /// Returns `true` if the peer was not known before. A sighting also
    /// clears the peer's failure counter.
    pub fn upsert(
        &self,
        peer_id: &PeerId,
        host: impl Into<String>,
        port: u16,
        now: DateTime<Utc>,
    ) -> bool {
        let host = host.into();
        let mut peers = self.peers.lock();
        match peers.get_mut(peer_id) {
            Some(record) => {
                record.host = host;
                record.port = port;
                record.last_seen = record.last_seen.max(now);
                record.failures = 0;
                false
            }
            None => {
                peers.insert(
                    peer_id.clone(),
                    PeerRecord {
                        peer_id: peer_id.clone(),
                        host,
                        port,
                        last_seen: now,
                        capabilities: Vec::new(),
                        failures: 0,
                    },
                );
                true
            }
        }
    }

    /// Refresh `last_seen` for a peer we already know. Returns `false` if absent.
    pub fn touch(&self, peer_id: &PeerId, now: DateTime<Utc>) -> bool {
        match self.peers.lock().get_mut(peer_id) {
            Some(record) => {
                record.last_seen = record.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    pub fn set_capabilities(&self, peer_id: &PeerId, capabilities: Vec<String>) {
        if let Some(record) = self.peers.lock().get_mut(peer_id) {
            record.capabilities = capabilities;
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.lock().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.lock().contains_key(peer_id)
    }

    pub fn remove(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.lock().remove(peer_id)
    }

    /// Ids of peers heard from within `stale_after` of `now`.
    pub fn list_active(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .lock()
            .values()
            .filter(|p| p.is_fresh(now, stale_after))
            .map(|p| p.peer_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of every record, sorted by id.
    pub fn list_all(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.lock().values().cloned().collect();
        records.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        records
    }

    /// Drop every peer whose `last_seen` is older than `stale_after`.
    pub fn prune_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<PeerId> {
        let mut removed = Vec::new();
        self.peers.lock().retain(|id, record| {
            let keep = record.is_fresh(now, stale_after);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    /// Count a failed send. Returns the new consecutive-failure count, or
    /// `None` if the peer is unknown.
    pub fn record_failure(&self, peer_id: &PeerId) -> Option<u32> {
        self.peers.lock().get_mut(peer_id).map(|record| {
            record.failures += 1;
            record.failures
        })
    }

    /// Count a delivered send: the peer is reachable, so it also counts as
    /// a sighting.
    pub fn record_success(&self, peer_id: &PeerId, now: DateTime<Utc>) {
        if let Some(record) = self.peers.lock().get_mut(peer_id) {
            record.failures = 0;
            record.last_seen = record.last_seen.max(now);
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.peers.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> PeerId {
        PeerId::from_string(s)
    }

    #[test]
    fn test_upsert_and_get() {
        let table = PeerTable::new();
        let now = Utc::now();

        assert!(table.upsert(&id("alpha"), "127.0.0.1", 50001, now));
        assert!(!table.upsert(&id("alpha"), "127.0.0.2", 50002, now));
        assert_eq!(table.len(), 1);

        let record = table.get(&id("alpha")).unwrap();
        assert_eq!(record.host, "127.0.0.2");
        assert_eq!(record.port, 50002);
        assert_eq!(record.address(), "127.0.0.2:50002");
        assert!(table.get(&id("beta")).is_none());
    }

    #[test]
    fn test_upsert_refreshes_last_seen_and_failures() {
        let table = PeerTable::new();
        let t0 = Utc::now();
        table.upsert(&id("alpha"), "h", 1, t0);
        table.record_failure(&id("alpha"));
        table.record_failure(&id("alpha"));

        let t1 = t0 + chrono::Duration::seconds(10);
        table.upsert(&id("alpha"), "h", 1, t1);
        let record = table.get(&id("alpha")).unwrap();
        assert_eq!(record.last_seen, t1);
        assert_eq!(record.failures, 0);
    }

    #[test]
    fn test_list_active_and_prune() {
        let table = PeerTable::new();
        let now = Utc::now();
        table.upsert(&id("fresh"), "h", 1, now);
        table.upsert(&id("stale"), "h", 2, now - chrono::Duration::seconds(120));

        let stale_after = Duration::from_secs(60);
        assert_eq!(table.list_active(now, stale_after), vec![id("fresh")]);

        let removed = table.prune_stale(now, stale_after);
        assert_eq!(removed, vec![id("stale")]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_touch_only_known() {
        let table = PeerTable::new();
        let t0 = Utc::now();
        assert!(!table.touch(&id("ghost"), t0));
        assert!(table.is_empty());

        table.upsert(&id("alpha"), "h", 1, t0);
        let t1 = t0 + chrono::Duration::seconds(5);
        assert!(table.touch(&id("alpha"), t1));
        assert_eq!(table.get(&id("alpha")).unwrap().last_seen, t1);
    }

    #[test]
    fn test_failure_counting() {
        let table = PeerTable::new();
        assert_eq!(table.record_failure(&id("ghost")), None);

        table.upsert(&id("alpha"), "h", 1, Utc::now());
        assert_eq!(table.record_failure(&id("alpha")), Some(1));
        assert_eq!(table.record_failure(&id("alpha")), Some(2));
        table.record_success(&id("alpha"), Utc::now());
        assert_eq!(table.record_failure(&id("alpha")), Some(1));
    }

    #[test]
    fn test_success_keeps_peer_fresh() {
        let table = PeerTable::new();
        let t0 = Utc::now();
        let stale_after = Duration::from_secs(60);
        table.upsert(&id("quiet"), "h", 1, t0);

        // Never heard from, but we keep reaching it.
        let t1 = t0 + chrono::Duration::seconds(50);
        table.record_success(&id("quiet"), t1);

        let later = t0 + chrono::Duration::seconds(90);
        assert_eq!(table.list_active(later, stale_after), vec![id("quiet")]);
        assert!(table.prune_stale(later, stale_after).is_empty());
    }

    #[test]
    fn test_remove_and_capabilities() {
        let table = PeerTable::new();
        table.upsert(&id("alpha"), "::1", 9, Utc::now());
        table.set_capabilities(&id("alpha"), vec!["chat".into()]);

        let removed = table.remove(&id("alpha")).unwrap();
        assert_eq!(removed.capabilities, vec!["chat".to_string()]);
        assert_eq!(removed.address(), "[::1]:9");
        assert!(table.remove(&id("alpha")).is_none());
    }

    #[test]
    fn test_concurrent_upserts_lose_nothing() {
        let table = Arc::new(PeerTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        table.upsert(&id(&format!("p{t}-{i}")), "h", 1, Utc::now());
                        table.record_failure(&id("shared"));
                    }
                })
            })
            .collect();
        table.upsert(&id("shared"), "h", 1, Utc::now());
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 8 * 250 + 1);
    }
}
