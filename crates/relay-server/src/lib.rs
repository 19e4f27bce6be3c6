//! # relay-server
//!
//! Axum HTTP + `WebSocket` event relay.
//!
//! - `POST /events`: ingest one JSON event from the workflow engine
//! - `GET /ws`: long-lived subscriber stream; every ingested event is
//!   fanned out to all currently connected subscribers
//! - `GET /health`, `GET /metrics`: liveness and Prometheus exposition
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod ws;
