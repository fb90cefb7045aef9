//! Git plumbing for sourcepin.
//!
//! - [`client::Git`] wraps individual git subcommands for one job's
//!   working directory.
//! - [`dedup::commit_and_dedup`] publishes a working tree into an internal
//!   repository as a content-addressed `(branch, tag, commit)`.
//! - [`classify`] recognises benign git failures by their messages.

pub mod classify;
pub mod client;
pub mod dedup;
pub mod settings;
pub mod version;

pub use client::Git;
pub use dedup::{commit_and_dedup, DedupOptions};
pub use settings::{CommitIdentity, GitSettings};
pub use version::GitVersion;
