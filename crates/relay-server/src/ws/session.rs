//! Subscriber session lifecycle: a single connection from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

use super::connection::{ConnectionId, SubscriberConnection};
use super::registry::ConnectionRegistry;

/// Capacity of the per-connection outbound queue. A subscriber that falls
/// this far behind starts failing sends and is dropped by the broadcaster.
const SEND_BUFFER: usize = 256;

/// Run one subscriber session.
///
/// 1. `Connecting → Open`: the upgrade has completed, so the connection
///    is marked open and registered
/// 2. An outbound forwarder task drains the send queue into the socket
///    and pings the subscriber on `ping_interval`
/// 3. The inbound loop blocks on reads purely for liveness/disconnect
///    detection; frame content is accepted and ignored
/// 4. `Open → Closed` on remote close, read error, unresponsive peer, or
///    shutdown cancellation; the session then deregisters exactly once
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_session(
    socket: WebSocket,
    conn_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    ping_interval: Duration,
    pong_timeout: Duration,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(SEND_BUFFER);
    let connection = Arc::new(SubscriberConnection::new(conn_id, send_tx));

    // Handshake already succeeded by the time axum hands us the socket.
    let _ = connection.mark_open();
    if !registry.add(connection.clone()).await {
        // Ids are uuidv7; a collision means a bug upstream.
        warn!("duplicate connection id, dropping session");
        return;
    }

    info!("subscriber connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Outbound forwarder with periodic Ping frames.
    let outbound_conn = connection.clone();
    let outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_activity_elapsed() > pong_timeout
                    {
                        warn!("subscriber unresponsive for {pong_timeout:?}, closing");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop: liveness and disconnect detection only.
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("shutdown requested, closing session");
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        connection.mark_alive();
                        debug!(len = text.len(), "ignoring inbound text frame");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        connection.mark_alive();
                        debug!(len = data.len(), "ignoring inbound binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("subscriber sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        info!(error = %e, "read error, closing session");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Open → Closed, then deregister. Both are idempotent: the broadcaster
    // may already have reaped this connection after a failed send.
    let _ = connection.close();
    let _ = registry.remove(&connection.id).await;
    outbound.abort();

    info!(age = ?connection.age(), dropped = connection.drop_count(), "subscriber disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}
