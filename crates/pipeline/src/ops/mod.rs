//! Per-operation orchestration.
//!
//! Every operation works in its own scratch directory under the configured
//! work directory. The directory is a [`TempDir`], so it is removed however
//! the operation ends: success, error or cancellation.

mod adjust;
mod clone;
mod pull;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::request::JobRequest;
use sourcepin_core::result::JobResult;
use tempfile::TempDir;

use crate::adjust::AdjustPipeline;
use crate::repo::RepoProvider;
use crate::settings::{PipelineSettings, Sequence};

pub use clone::sync_refs;

/// Runs pull, clone and adjust requests.
pub struct Pipeline {
    settings: PipelineSettings,
    repos: RepoProvider,
    aligners: AdjustPipeline,
    sequence: Sequence,
    http: reqwest::Client,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        repos: RepoProvider,
        aligners: AdjustPipeline,
    ) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sourcepin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::Config(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            settings,
            repos,
            aligners,
            sequence: Sequence::new(),
            http,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn repos(&self) -> &RepoProvider {
        &self.repos
    }

    /// Run one request to completion.
    pub async fn run(&self, ctx: &JobContext, request: &JobRequest) -> CoreResult<JobResult> {
        match request {
            JobRequest::Pull(r) => self.pull(ctx, r).await.map(JobResult::Reference),
            JobRequest::Clone(r) => self.clone_repo(ctx, r).await.map(JobResult::Clone),
            JobRequest::Adjust(r) => self.adjust(ctx, r).await.map(JobResult::Reference),
        }
    }

    async fn scratch(&self, operation: &str) -> CoreResult<TempDir> {
        let work_dir = &self.settings.work_dir;
        tokio::fs::create_dir_all(work_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{operation}-"))
            .tempdir_in(work_dir)?;
        Ok(dir)
    }
}

/// Remove a scratch directory off the async runtime, logging failures.
async fn release(ctx: &JobContext, scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    let closed = tokio::task::spawn_blocking(move || scratch.close()).await;
    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(job_id = %ctx.job_id(), path = %path.display(), error = %e, "Scratch directory not removed")
        }
        Err(e) => {
            tracing::warn!(job_id = %ctx.job_id(), path = %path.display(), error = %e, "Scratch cleanup task failed")
        }
    }
}
