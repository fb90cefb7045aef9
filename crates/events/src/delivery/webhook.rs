//! Callback delivery with exponential-backoff retry.
//!
//! [`CallbackDelivery`] sends a JSON payload to the URL captured from the
//! job's request, using the requested method and optional `Authorization`
//! header. A non-2xx status or a transport error is retried according to
//! [`RetryPolicy`]; once the attempts are exhausted the failure is logged
//! and returned, and the result is not persisted anywhere else.

use std::time::Duration;

use sourcepin_core::request::{CallbackMethod, CallbackSpec};

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    /// Every attempt failed; carries the last failure.
    #[error("Callback not delivered after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<WebhookError>,
    },
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: `initial_delay`, doubled after every
/// failed attempt, for at most `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Sleep durations between consecutive attempts.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|n| self.initial_delay.saturating_mul(1u32 << n.min(31)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CallbackDelivery
// ---------------------------------------------------------------------------

/// Delivers job results to caller-supplied callback endpoints.
pub struct CallbackDelivery {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl CallbackDelivery {
    pub fn new(policy: RetryPolicy) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliver `payload` to the callback, retrying per the policy.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    pub async fn deliver(
        &self,
        callback: &CallbackSpec,
        payload: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let mut delays = self.policy.delays().into_iter();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.try_send(callback, payload).await {
                Ok(()) => {
                    tracing::info!(url = %callback.url, attempt, "Callback delivered");
                    return Ok(());
                }
                Err(e) => e,
            };

            match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        url = %callback.url,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Callback delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        attempts = attempt,
                        url = %callback.url,
                        error = %err,
                        "Callback delivery failed after all retries, result is lost"
                    );
                    return Err(WebhookError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
            }
        }
    }

    /// Execute a single request and check the response status.
    async fn try_send(
        &self,
        callback: &CallbackSpec,
        payload: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let request = match callback.method {
            CallbackMethod::Post => self.client.post(&callback.url),
            CallbackMethod::Put => self.client.put(&callback.url),
        };
        let request = match &callback.auth_header {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        };

        let response = request.json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
