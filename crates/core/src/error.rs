use std::fmt;

use serde::Serialize;

/// Exit code reported to callers when a command failed because of what
/// they asked for (bad ref, unreachable URL, rejected parameters) rather
/// than because of a fault in this service.
pub const USER_ERROR_EXIT_CODE: i32 = 10;

/// An external process (usually git) exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFailure {
    /// Caller-facing description of what was being attempted.
    pub desc: String,
    /// Full command line, program first.
    pub cmd: Vec<String>,
    /// Exit code, `None` if the process could not be spawned or was
    /// terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandFailure {
    /// Whether the failure has been classified as the caller's fault.
    pub fn is_user_error(&self) -> bool {
        self.exit_code == Some(USER_ERROR_EXIT_CODE)
    }

    /// Remap the exit code to [`USER_ERROR_EXIT_CODE`].
    pub fn into_user_error(mut self) -> Self {
        self.exit_code = Some(USER_ERROR_EXIT_CODE);
        self
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} (exit code {code})", self.desc),
            None => write!(f, "{} (no exit code)", self.desc),
        }
    }
}

/// Domain error shared by every crate in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Command(CommandFailure),

    #[error("No changes: {0}")]
    ContentUnchanged(String),

    #[error("Ref '{reference}' not found in {repo}")]
    RefNotFound { reference: String, repo: String },

    #[error("Could not acquire source from {url}: {reason}")]
    Acquisition { url: String, reason: String },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable name reported as `error_type` in result bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "ValidationError",
            CoreError::Command(_) => "CommandError",
            CoreError::ContentUnchanged(_) => "ContentUnchanged",
            CoreError::RefNotFound { .. } => "RefNotFound",
            CoreError::Acquisition { .. } => "AcquisitionError",
            CoreError::Cancelled => "Cancelled",
            CoreError::Config(_) => "ConfigError",
            CoreError::Io(_) => "IoError",
            CoreError::Internal(_) => "InternalError",
        }
    }

    /// Described failures are reported with status 400; everything else
    /// is unexpected and reported with status 500.
    pub fn is_described(&self) -> bool {
        !matches!(
            self,
            CoreError::Io(_) | CoreError::Internal(_) | CoreError::Config(_)
        )
    }
}

impl From<CommandFailure> for CoreError {
    fn from(failure: CommandFailure) -> Self {
        CoreError::Command(failure)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
