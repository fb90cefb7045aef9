use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};
use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::request::CallbackSpec;
use sourcepin_core::result::JobResult;
use sourcepin_core::types::JobId;

use super::JobEngine;
use crate::error::AppError;

/// Terminal result of a job: the response body a synchronous caller gets,
/// and the base of the callback payload.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: StatusCode,
    /// Result or error object, plus the job's `log`.
    pub body: Map<String, Value>,
    pub cancelled: bool,
}

impl JobOutcome {
    pub fn new(result: CoreResult<JobResult>, log: String) -> Self {
        let (status, mut body, cancelled) = match result.and_then(result_object) {
            Ok(body) => (StatusCode::OK, body, false),
            Err(e) => {
                let cancelled = matches!(e, CoreError::Cancelled);
                let report = AppError::from(e).report();
                (report.status, report.body, cancelled)
            }
        };
        body.insert("log".into(), log.into());
        Self {
            status,
            body,
            cancelled,
        }
    }

    /// Body plus `{callback: {status, id}}`.
    pub fn callback_payload(&self, job_id: &JobId) -> Value {
        let mut payload = self.body.clone();
        payload.insert(
            "callback".into(),
            json!({"status": self.status.as_u16(), "id": job_id}),
        );
        Value::Object(payload)
    }
}

fn result_object(result: JobResult) -> CoreResult<Map<String, Value>> {
    match serde_json::to_value(&result) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CoreError::Internal(format!(
            "job result serialized to a non-object: {other}"
        ))),
        Err(e) => Err(CoreError::Internal(format!(
            "job result could not be serialized: {e}"
        ))),
    }
}

impl IntoResponse for JobOutcome {
    fn into_response(self) -> Response {
        (self.status, axum::Json(Value::Object(self.body))).into_response()
    }
}

impl JobEngine {
    /// Deliver the outcome to the job's callback.
    ///
    /// Delivery failures are logged and otherwise dropped: the caller that
    /// never receives its callback has lost the result.
    pub(super) async fn notify(&self, ctx: &JobContext, callback: &CallbackSpec, outcome: &JobOutcome) {
        let payload = outcome.callback_payload(ctx.job_id());
        match self.delivery.deliver(callback, &payload).await {
            Ok(()) => {
                ctx.log(format!("Callback delivered to {}", callback.url))
                    .await
            }
            Err(e) => {
                tracing::error!(
                    job_id = %ctx.job_id(),
                    url = %callback.url,
                    error = %e,
                    "Job result not delivered"
                );
                ctx.warn(format!("Callback to {} failed: {e}", callback.url))
                    .await;
            }
        }
    }
}
