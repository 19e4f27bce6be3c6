//! Event fan-out to connected subscribers.

use std::sync::Arc;

use metrics::counter;
use relay_core::Event;
use tracing::{debug, warn};

use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, BROADCAST_FAILURES_TOTAL};

use super::connection::ConnectionId;
use super::registry::ConnectionRegistry;

/// Result of one broadcast pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastOutcome {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections whose send failed; removed from the registry.
    pub dropped: usize,
}

/// Distributes each ingested event to every connection in a registry
/// snapshot, isolating per-connection failures.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over the given registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this broadcaster delivers against.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send the canonical form of `event` to every connection in the
    /// current snapshot.
    ///
    /// The event is serialized exactly once; all recipients get
    /// byte-identical payloads. A failed send is terminal for that
    /// connection: it is removed after the delivery pass and never
    /// surfaces to the caller. Broadcasting with no subscribers succeeds
    /// trivially.
    pub async fn broadcast(&self, event: &Event) -> BroadcastOutcome {
        let payload = Arc::new(event.canonical_json());
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            debug!("broadcast with no subscribers");
            return BroadcastOutcome::default();
        }

        let mut delivered = 0usize;
        let mut failed: Vec<ConnectionId> = Vec::new();
        for conn in &snapshot {
            if conn.send(payload.clone()) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, "failed to send event to subscriber");
                failed.push(conn.id.clone());
            }
        }

        // Removal happens in a separate pass, never while iterating the
        // snapshot used for delivery.
        for id in &failed {
            let _ = self.registry.remove(id).await;
        }

        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        counter!(BROADCAST_FAILURES_TOTAL).increment(failed.len() as u64);
        debug!(
            recipients = snapshot.len(),
            delivered,
            dropped = failed.len(),
            "broadcast complete"
        );

        BroadcastOutcome {
            delivered,
            dropped: failed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::SubscriberConnection;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_connection(id: &str) -> (Arc<SubscriberConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = SubscriberConnection::new(id.into(), tx);
        let _ = conn.mark_open();
        (Arc::new(conn), rx)
    }

    fn make_broadcaster() -> Broadcaster {
        Broadcaster::new(Arc::new(ConnectionRegistry::new()))
    }

    #[tokio::test]
    async fn empty_registry_succeeds_with_zero_attempts() {
        let bc = make_broadcaster();
        let outcome = bc.broadcast(&Event::from_value(json!({"a": 1}))).await;
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[tokio::test]
    async fn delivers_to_all_open_connections() {
        let bc = make_broadcaster();
        let (c1, mut rx1) = make_connection("c1");
        let (c2, mut rx2) = make_connection("c2");
        let _ = bc.registry().add(c1).await;
        let _ = bc.registry().add(c2).await;

        let outcome = bc.broadcast(&Event::from_value(json!({"a": 1}))).await;
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.dropped, 0);

        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert_eq!(&*m1, r#"{"a":1}"#);
        // Byte-identical payloads for one event.
        assert!(Arc::ptr_eq(&m1, &m2));
        // Both remain registered.
        assert_eq!(bc.registry().len().await, 2);
    }

    #[tokio::test]
    async fn failed_connection_removed_after_pass() {
        let bc = make_broadcaster();
        let (healthy, mut rx) = make_connection("healthy");
        let (tx, dead_rx) = mpsc::channel(32);
        let dead = SubscriberConnection::new("dead".into(), tx);
        let _ = dead.mark_open();
        drop(dead_rx); // broken transport, discovered on send
        let _ = bc.registry().add(healthy).await;
        let _ = bc.registry().add(Arc::new(dead)).await;

        let outcome = bc.broadcast(&Event::from_value(json!({"x": true}))).await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.dropped, 1);

        // Survivor got the message; the dead connection is gone.
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"x":true}"#);
        let snap = bc.registry().snapshot().await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id.as_str(), "healthy");
    }

    #[tokio::test]
    async fn closed_connection_counts_as_dropped() {
        let bc = make_broadcaster();
        let (conn, _rx) = make_connection("c1");
        let _ = conn.close();
        let _ = bc.registry().add(conn).await;

        let outcome = bc.broadcast(&Event::from_value(json!(1))).await;
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.dropped, 1);
        assert!(bc.registry().is_empty().await);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let bc = make_broadcaster();
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (conn, rx) = make_connection(&format!("c{i}"));
            let _ = bc.registry().add(conn).await;
            receivers.push(rx);
        }
        let (tx, broken_rx) = mpsc::channel(32);
        let broken = SubscriberConnection::new("broken".into(), tx);
        let _ = broken.mark_open();
        drop(broken_rx);
        let _ = bc.registry().add(Arc::new(broken)).await;

        let outcome = bc.broadcast(&Event::from_value(json!({"k": "v"}))).await;
        assert_eq!(outcome.delivered, 4);
        assert_eq!(outcome.dropped, 1);
        for rx in &mut receivers {
            assert_eq!(&*rx.recv().await.unwrap(), r#"{"k":"v"}"#);
        }
        assert_eq!(bc.registry().len().await, 4);
    }

    #[tokio::test]
    async fn connection_removed_before_snapshot_gets_nothing() {
        let bc = make_broadcaster();
        let (gone, mut gone_rx) = make_connection("gone");
        let (stays, mut stays_rx) = make_connection("stays");
        let _ = bc.registry().add(gone.clone()).await;
        let _ = bc.registry().add(stays).await;
        let _ = bc.registry().remove(&gone.id).await;

        let _ = bc.broadcast(&Event::from_value(json!({"n": 1}))).await;

        assert!(gone_rx.try_recv().is_err());
        assert!(stays_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn sequential_broadcasts_preserve_per_connection_order() {
        let bc = make_broadcaster();
        let (conn, mut rx) = make_connection("c1");
        let _ = bc.registry().add(conn).await;

        for i in 0..10 {
            let _ = bc.broadcast(&Event::from_value(json!({"seq": i}))).await;
        }
        for i in 0..10 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(&*msg, &format!(r#"{{"seq":{i}}}"#));
        }
    }
}
