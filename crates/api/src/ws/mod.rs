//! Live-log WebSocket endpoint.
//!
//! Provides connection tracking, heartbeat pings and the HTTP upgrade
//! handler mounted at `/ws/{job_id}`.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
