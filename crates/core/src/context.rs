//! Per-job execution context.
//!
//! A [`JobContext`] is created once per job and passed explicitly to every
//! stage. It carries the job id (used to route log lines), the log-context
//! id, the cooperative cancellation token and the observable job state.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::types::{JobId, LogContextId};

/// Destination for job-tagged log lines.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn publish(&self, job_id: &JobId, line: &str);
}

/// Sink that drops every line. Used when nobody can observe the job.
pub struct DiscardSink;

#[async_trait]
impl LogSink for DiscardSink {
    async fn publish(&self, _job_id: &JobId, _line: &str) {}
}

/// Lifecycle of a job.
///
/// `Cancelled` is reachable from any non-terminal state; a cancelled job
/// still passes through `Notifying` so its caller hears about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Accepted,
    AcquiringSource,
    Aligning,
    Committing,
    Notifying,
    Done,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Accepted => "accepted",
            JobState::AcquiringSource => "acquiring_source",
            JobState::Aligning => "aligning",
            JobState::Committing => "committing",
            JobState::Notifying => "notifying",
            JobState::Done => "done",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Execution context threaded through every call a job makes.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    log_context: LogContextId,
    cancel: CancellationToken,
    state: Arc<watch::Sender<JobState>>,
    sink: Arc<dyn LogSink>,
}

impl JobContext {
    pub fn new(job_id: JobId, sink: Arc<dyn LogSink>) -> Self {
        let (state, _) = watch::channel(JobState::Accepted);
        Self {
            job_id,
            log_context: LogContextId::generate(),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            sink,
        }
    }

    /// Context with a fresh id whose log lines only reach `tracing`.
    pub fn detached() -> Self {
        Self::new(JobId::generate(), Arc::new(DiscardSink))
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn log_context(&self) -> &LogContextId {
        &self.log_context
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation check point. Called before every external process and
    /// every network operation.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, next: JobState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(
                job_id = %self.job_id,
                log_context = %self.log_context,
                from = %previous,
                to = %next,
                "Job state changed"
            );
        }
    }

    /// Emit an informational line to the job's log.
    pub async fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::info!(job_id = %self.job_id, log_context = %self.log_context, "{line}");
        self.sink.publish(&self.job_id, line).await;
    }

    /// Emit a warning line to the job's log.
    pub async fn warn(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::warn!(job_id = %self.job_id, log_context = %self.log_context, "{line}");
        self.sink
            .publish(&self.job_id, &format!("WARNING: {line}"))
            .await;
    }

    /// Emit raw command output. Logged at debug level to keep server logs
    /// quiet while subscribers still see everything.
    pub async fn output(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::debug!(job_id = %self.job_id, "{line}");
        self.sink.publish(&self.job_id, line).await;
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("log_context", &self.log_context)
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.state())
            .finish()
    }
}
