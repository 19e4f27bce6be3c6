//! Concurrency-safe set of live subscriber connections.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{ConnectionId, SubscriberConnection};

/// The current set of open connections, keyed by identity.
///
/// Membership mutations and snapshots are individually exclusive under the
/// lock; broadcast delivery iterates a snapshot with no lock held, so a
/// stalled subscriber can never block registration.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<SubscriberConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection.
    ///
    /// No-op if the identity is already present: the existing entry is
    /// kept and `false` is returned. An identity never appears twice.
    pub async fn add(&self, connection: Arc<SubscriberConnection>) -> bool {
        let mut conns = self.connections.write().await;
        match conns.entry(connection.id.clone()) {
            Entry::Occupied(_) => {
                debug!(conn_id = %connection.id, "connection already registered");
                false
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Unregister by identity. No-op, not an error, if absent.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<SubscriberConnection>> {
        let mut conns = self.connections.write().await;
        conns.remove(id)
    }

    /// An immutable copy of the current membership, safe to iterate
    /// without observing concurrent mutation.
    pub async fn snapshot(&self) -> Vec<Arc<SubscriberConnection>> {
        let conns = self.connections.read().await;
        conns.values().cloned().collect()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Drop all membership. Called at service stop.
    pub async fn clear(&self) {
        let mut conns = self.connections.write().await;
        conns.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
