//! `POST /events` ingestion endpoint.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use metrics::counter;
use relay_core::Event;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::metrics::{INGEST_EVENTS_TOTAL, INGEST_REJECTED_TOTAL};
use crate::server::AppState;

/// Acknowledgement body for accepted events.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    /// Always `"success"`.
    pub status: &'static str,
}

/// POST /events
///
/// Parses the body as JSON before anything else; a malformed payload is
/// rejected with `400 INVALID_PAYLOAD` and nothing is broadcast. A valid
/// event is fanned out to all current subscribers and acknowledged
/// regardless of how many deliveries succeeded. Delivery failures never
/// surface to the producer.
pub async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestAck>, IngestError> {
    let event = Event::from_slice(&body).inspect_err(|e| {
        counter!(INGEST_REJECTED_TOTAL).increment(1);
        debug!(error = %e, "rejecting malformed event");
    })?;

    counter!(INGEST_EVENTS_TOTAL).increment(1);
    let outcome = state.broadcaster.broadcast(&event).await;
    info!(
        delivered = outcome.delivered,
        dropped = outcome.dropped,
        "event ingested"
    );

    Ok(Json(IngestAck { status: "success" }))
}
