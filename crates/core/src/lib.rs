//! Domain building blocks shared by every sourcepin crate.
//!
//! - [`context::JobContext`] carries job id, cancellation and log routing
//!   explicitly through each stage of a job.
//! - [`process`] runs external programs with live output streaming.
//! - [`request`] and [`result`] define the HTTP-facing data model.
//! - [`error::CoreError`] is the shared error taxonomy.

pub mod context;
pub mod error;
pub mod hashing;
pub mod process;
pub mod request;
pub mod result;
pub mod types;
