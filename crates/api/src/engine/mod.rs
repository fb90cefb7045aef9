//! Job engine.
//!
//! Owns each request's lifecycle: registers the job, runs the pipeline
//! inside a spawned task, assembles the terminal outcome and hands it to
//! the caller directly (no callback) or to the callback delivery.
//!
//! Jobs always run in their own task. A synchronous caller only awaits the
//! task, so a dropped connection or a request timeout never interrupts a
//! git operation half way.

mod notify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sourcepin_core::context::{JobContext, JobState, LogSink};
use sourcepin_core::error::CoreError;
use sourcepin_core::request::JobRequest;
use sourcepin_core::types::JobId;
use sourcepin_events::{CallbackDelivery, LogHub};
use sourcepin_pipeline::Pipeline;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;

use crate::error::{AppError, AppResult};

pub use notify::JobOutcome;

/// Handle returned to asynchronous callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub id: JobId,
    /// Live-log address of the job.
    pub websocket: String,
}

/// What [`JobEngine::submit`] hands back.
#[derive(Debug)]
pub enum Submission {
    /// No callback was given: the finished job.
    Completed(JobOutcome),
    /// A callback was given: the job runs on in the background.
    Accepted(Accepted),
}

/// Cheaply cloneable; all state is behind `Arc`.
#[derive(Clone)]
pub struct JobEngine {
    pipeline: Arc<Pipeline>,
    logs: Arc<LogHub>,
    delivery: Arc<CallbackDelivery>,
    public_ws_url: String,
    running: Arc<RwLock<HashMap<JobId, JobContext>>>,
    /// Every job task, until its outcome is delivered.
    tasks: TaskTracker,
}

impl JobEngine {
    pub fn new(
        pipeline: Arc<Pipeline>,
        logs: Arc<LogHub>,
        delivery: Arc<CallbackDelivery>,
        public_ws_url: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            logs,
            delivery,
            public_ws_url: public_ws_url.into(),
            running: Arc::new(RwLock::new(HashMap::new())),
            tasks: TaskTracker::new(),
        }
    }

    /// Validate and start a job.
    ///
    /// Without a callback this waits for the job and returns its outcome;
    /// with one it returns the job id and live-log address immediately.
    pub async fn submit(&self, request: JobRequest) -> AppResult<Submission> {
        request.check()?;

        let sink: Arc<dyn LogSink> = self.logs.clone();
        let ctx = JobContext::new(JobId::generate(), sink);
        let job_id = ctx.job_id().clone();
        let callback = request.callback().cloned();

        self.logs.open(&job_id).await;
        self.running.write().await.insert(job_id.clone(), ctx.clone());
        tracing::info!(
            job_id = %job_id,
            operation = request.operation(),
            callback = callback.is_some(),
            "Job accepted"
        );

        let accepted = callback.is_some().then(|| Accepted {
            websocket: format!("{}/ws/{job_id}", self.public_ws_url),
            id: job_id.clone(),
        });

        let engine = self.clone();
        let handle = self.tasks.spawn(async move {
            let outcome = engine.execute(&ctx, &request).await;
            if let Some(callback) = &callback {
                engine.notify(&ctx, callback, &outcome).await;
            }
            engine.finish(&ctx, &outcome).await;
            outcome
        });

        match accepted {
            Some(accepted) => Ok(Submission::Accepted(accepted)),
            None => handle.await.map(Submission::Completed).map_err(|e| {
                AppError::Core(CoreError::Internal(format!("job {job_id} task failed: {e}")))
            }),
        }
    }

    /// Request cancellation of a running job.
    ///
    /// Returns `false` for unknown or already finished jobs.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self.running.read().await.get(job_id) {
            Some(ctx) => {
                ctx.cancel();
                tracing::info!(job_id = %job_id, state = %ctx.state(), "Job cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running job and wait up to `grace` for all job tasks,
    /// callback delivery included, to finish.
    ///
    /// Returns `false` if some task was still busy when `grace` ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks.close();
        for (job_id, ctx) in self.running.read().await.iter() {
            ctx.cancel();
            tracing::info!(job_id = %job_id, state = %ctx.state(), "Cancelling job for shutdown");
        }
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tasks.len(),
                    grace_secs = grace.as_secs(),
                    "Jobs still running at shutdown deadline"
                );
                false
            }
        }
    }

    /// Number of jobs still in their pipeline stages.
    pub async fn running_jobs(&self) -> usize {
        self.running.read().await.len()
    }

    async fn execute(&self, ctx: &JobContext, request: &JobRequest) -> JobOutcome {
        ctx.log(format!("Starting {} job {}", request.operation(), ctx.job_id()))
            .await;
        let result = self.pipeline.run(ctx, request).await;
        self.running.write().await.remove(ctx.job_id());

        ctx.set_state(JobState::Notifying);
        match &result {
            Ok(_) => ctx.log("Job finished").await,
            Err(CoreError::Cancelled) => ctx.log("Job cancelled").await,
            Err(e) => ctx.log(format!("Job failed: {e}")).await,
        }

        let log = self.logs.read_log(ctx.job_id()).await;
        JobOutcome::new(result, log)
    }

    /// Move the job to its terminal state and end its live log.
    async fn finish(&self, ctx: &JobContext, outcome: &JobOutcome) {
        let terminal = if outcome.cancelled {
            JobState::Cancelled
        } else {
            JobState::Done
        };
        ctx.set_state(terminal);
        self.logs.close(ctx.job_id()).await;
    }
}
