//! Seen-set: Bounded dedup cache of recently observed message ids.
//!
//! The flooding protocol relies on [`SeenSet::mark_if_new`] being the single
//! check-and-insert gate for every inbound copy of a message. Entries expire
//! after a retention window and the set never holds more than `capacity`
//! ids; when full, the oldest id is evicted first.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    /// id -> first-seen time.
    ids: HashMap<String, DateTime<Utc>>,
    /// Insertion order, oldest at the front.
    order: VecDeque<(String, DateTime<Utc>)>,
}

impl Inner {
    fn evict_expired(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> usize {
        let mut evicted = 0;
        while let Some((_, seen_at)) = self.order.front() {
            if now - *seen_at <= retention {
                break;
            }
            if let Some((id, _)) = self.order.pop_front() {
                self.ids.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Bounded, time-windowed set of message ids.
#[derive(Debug)]
pub struct SeenSet {
    inner: Mutex<Inner>,
    retention: chrono::Duration,
    capacity: usize,
}

impl SeenSet {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            capacity: capacity.max(1),
        }
    }

    /// Record `id` as seen. Returns `true` the first time, `false` for a
    /// duplicate still inside the window.
    pub fn mark_if_new(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        inner.evict_expired(now, self.retention);

        if inner.ids.contains_key(id) {
            return false;
        }

        inner.ids.insert(id.to_string(), now);
        inner.order.push_back((id.to_string(), now));

        while inner.order.len() > self.capacity {
            if let Some((oldest, _)) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains_key(id)
    }

    /// Drop entries older than the retention window. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        self.inner.lock().evict_expired(now, self.retention)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ids.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.ids.clear();
        inner.order.clear();
    }
}
