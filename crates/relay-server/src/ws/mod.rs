//! WebSocket subscriber management: connection state, registry,
//! broadcast fan-out, and the per-subscriber session loop.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod session;
