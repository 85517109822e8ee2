//! In-memory catalog of resources shared over the mesh.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub data: serde_json::Value,
    /// Node that published the resource.
    pub source: PeerId,
    pub timestamp: DateTime<Utc>,
}

/// Bounded map of resource id to [`Resource`]. When full, the entry with the
/// oldest timestamp makes room.
#[derive(Debug)]
pub struct ResourceCatalog {
    resources: Mutex<HashMap<String, Resource>>,
    capacity: usize,
}

impl ResourceCatalog {
    pub fn new(capacity: usize) -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Insert or replace a resource.
    pub fn insert(&self, resource: Resource) {
        let mut resources = self.resources.lock();
        if !resources.contains_key(&resource.id) && resources.len() >= self.capacity {
            let oldest = resources
                .values()
                .min_by_key(|r| r.timestamp)
                .map(|r| r.id.clone());
            if let Some(oldest) = oldest {
                resources.remove(&oldest);
            }
        }
        resources.insert(resource.id.clone(), resource);
    }

    pub fn get(&self, id: &str) -> Option<Resource> {
        self.resources.lock().get(id).cloned()
    }

    /// All resources, optionally restricted to one type, newest first.
    pub fn list(&self, resource_type: Option<&str>) -> Vec<Resource> {
        let mut list: Vec<Resource> = self
            .resources
            .lock()
            .values()
            .filter(|r| resource_type.is_none_or(|t| r.resource_type == t))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        list
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }
}
