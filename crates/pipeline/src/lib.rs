//! Source acquisition, alignment and per-operation orchestration.
//!
//! [`Pipeline`] runs one job request end to end: it provisions the
//! internal repository, acquires the source into a scratch working tree,
//! runs the configured alignment providers and commits the outcome through
//! the content-addressed dedup layer.

pub mod acquire;
pub mod adjust;
pub mod fsutil;
pub mod ops;
pub mod repo;
pub mod settings;

pub use adjust::{AdjustPipeline, AdjustProvider, CommandProvider};
pub use ops::Pipeline;
pub use repo::RepoProvider;
pub use settings::{PipelineSettings, Sequence};
