//! Sourcepin API server library.
//!
//! Exposes configuration, state, the job engine, error handling, routes and
//! WebSocket infrastructure so integration tests and the binary entrypoint
//! share the same building blocks.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
