//! The ingested event value and its canonical wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error constructing an [`Event`] from raw input.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The body could not be parsed as well-formed JSON.
    #[error("payload is not well-formed JSON: {source}")]
    InvalidPayload {
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// One externally supplied structured message to be distributed.
///
/// An `Event` is opaque to the relay: the only validation applied is that
/// the input parses as well-formed JSON. No schema is imposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    /// Parse raw request bytes into an event.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|source| EventError::InvalidPayload { source })
    }

    /// Wrap an already-parsed JSON value.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// The canonical textual form distributed to subscribers.
    ///
    /// Serialized exactly once per broadcast; all subscribers receive
    /// byte-identical payloads for one event.
    pub fn canonical_json(&self) -> String {
        self.0.to_string()
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
