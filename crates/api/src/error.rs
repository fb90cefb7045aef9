use std::backtrace::Backtrace;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use sourcepin_core::error::CoreError;
use sourcepin_core::hashing::traceback_digest;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for job and validation failures and adds the
/// HTTP-only cases. Every error body has the same shape:
/// `{error_type, error_traceback, desc, ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// `POST /cancel/{job_id}` for a job that is not running.
    #[error("No running job with id {0}")]
    JobNotFound(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Core(CoreError::Validation(rejection.body_text()))
    }
}

/// Status code and JSON body describing a failure.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub body: Map<String, Value>,
}

impl AppError {
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Core(e) => e.error_type(),
            AppError::JobNotFound(_) => "JobNotFound",
        }
    }

    /// Described failures are the caller's to fix (400); anything else is
    /// unexpected (500).
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Core(e) if !e.is_described() => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Core(_) | AppError::JobNotFound(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Build the caller-facing report.
    ///
    /// The trace record is logged and only its digest is returned, so a
    /// caller can quote `error_traceback` to find the record in server logs.
    /// Each report gets its own occurrence id, so the digest identifies one
    /// failure rather than one call site.
    pub fn report(&self) -> ErrorReport {
        let trace = self.trace_record();
        let digest = traceback_digest(&trace);
        let status = self.status();

        tracing::error!(
            error_type = self.error_type(),
            error_traceback = %digest,
            status = status.as_u16(),
            error = %self,
            trace = %trace,
            "Request failed"
        );

        let mut body = Map::new();
        body.insert("error_type".into(), self.error_type().into());
        body.insert("error_traceback".into(), digest.into());
        body.insert("desc".into(), self.describe().into());

        if let AppError::Core(CoreError::Command(failure)) = self {
            body.insert("cmd".into(), failure.cmd.clone().into());
            body.insert(
                "exit_code".into(),
                failure.exit_code.map(Value::from).unwrap_or(Value::Null),
            );
        }
        if let AppError::Core(CoreError::RefNotFound { reference, repo }) = self {
            body.insert("ref".into(), reference.clone().into());
            body.insert("repo".into(), repo.clone().into());
        }

        ErrorReport { status, body }
    }

    /// Text behind `error_traceback`: occurrence, error and stack.
    fn trace_record(&self) -> String {
        format!(
            "occurrence {} at {}\n{}: {self}\n{}",
            uuid::Uuid::new_v4(),
            chrono::Utc::now().to_rfc3339(),
            self.error_type(),
            Backtrace::force_capture()
        )
    }

    /// Message shown to callers. Unexpected failures are not echoed back.
    fn describe(&self) -> String {
        match self {
            AppError::Core(e) if !e.is_described() => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = self.report();
        (report.status, axum::Json(Value::Object(report.body))).into_response()
    }
}
