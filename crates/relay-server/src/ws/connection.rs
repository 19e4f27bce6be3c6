//! One subscriber connection: identity, lifecycle state, send capability.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique, comparable handle identifying one subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh id (`conn_<uuidv7>`).
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle state of a subscriber connection. Transitions are monotonic:
/// `Connecting → Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Stream handshake not yet complete.
    Connecting,
    /// Live and eligible for delivery.
    Open,
    /// Terminal; all sends are refused.
    Closed,
}

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// A connected subscriber.
///
/// Owned by the registry for membership and by its session task for
/// lifecycle transitions. The underlying transport may already be dead
/// while the state is still `Open`; that is discovered on the next send.
pub struct SubscriberConnection {
    /// Unique connection id.
    pub id: ConnectionId,
    state: AtomicU8,
    /// Send channel to the subscriber's outbound forwarder task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether any inbound activity arrived since the last liveness check.
    is_alive: AtomicBool,
    last_activity: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl SubscriberConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: AtomicU8::new(STATE_CONNECTING),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_activity: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTING => Lifecycle::Connecting,
            STATE_OPEN => Lifecycle::Open,
            _ => Lifecycle::Closed,
        }
    }

    /// `Connecting → Open`. Returns `false` if the connection was not in
    /// `Connecting` (a closed connection never reopens).
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_CONNECTING,
                STATE_OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Transition to `Closed`. Idempotent; returns `true` only for the
    /// first close.
    pub fn close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED
    }

    /// Enqueue one message for the subscriber.
    ///
    /// Returns `false` (a delivery failure, never a panic) when the
    /// connection is not `Open` or the channel is full or closed. Failed
    /// sends increment the dropped counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.state() != Lifecycle::Open {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame counts as liveness).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Check and reset the liveness flag.
    ///
    /// Returns `true` if any activity was seen since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or establishment).
    pub fn last_activity_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (SubscriberConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (SubscriberConnection::new("conn_1".into(), tx), rx)
    }

    fn make_open() -> (SubscriberConnection, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = make_connection();
        assert!(conn.mark_open());
        (conn, rx)
    }

    #[test]
    fn starts_connecting() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.state(), Lifecycle::Connecting);
    }

    #[test]
    fn open_transition_happens_once() {
        let (conn, _rx) = make_connection();
        assert!(conn.mark_open());
        assert_eq!(conn.state(), Lifecycle::Open);
        // A second handshake completion is invalid.
        assert!(!conn.mark_open());
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = make_open();
        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), Lifecycle::Closed);
    }

    #[test]
    fn closed_connection_never_reopens() {
        let (conn, _rx) = make_connection();
        assert!(conn.close());
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), Lifecycle::Closed);
    }

    #[tokio::test]
    async fn send_while_open_delivers() {
        let (conn, mut rx) = make_open();
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn send_while_connecting_fails() {
        let (conn, _rx) = make_connection();
        assert!(!conn.send(Arc::new("early".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_while_closed_fails_without_panic() {
        let (conn, _rx) = make_open();
        let _ = conn.close();
        assert!(!conn.send(Arc::new("late".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_channel_fails() {
        let (tx, rx) = mpsc::channel(32);
        let conn = SubscriberConnection::new("conn_2".into(), tx);
        let _ = conn.mark_open();
        drop(rx);
        assert!(!conn.send(Arc::new("gone".into())));
    }

    #[test]
    fn send_to_full_channel_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = SubscriberConnection::new("conn_3".into(), tx);
        let _ = conn.mark_open();
        assert!(conn.send(Arc::new("first".into())));
        assert!(!conn.send(Arc::new("second".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn per_connection_order_preserved() {
        let (conn, mut rx) = make_open();
        for i in 0..5 {
            assert!(conn.send(Arc::new(format!("msg_{i}"))));
        }
        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(&*msg, &format!("msg_{i}"));
        }
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_open();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[test]
    fn age_increases() {
        let (conn, _rx) = make_open();
        let first = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > first);
    }
}
