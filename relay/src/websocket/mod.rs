//! WebSocket support for realtime change feeds.
//!
//! Clients connect via WebSocket, subscribe to collections and receive every
//! insert, update and delete applied to them, including their own writes.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
