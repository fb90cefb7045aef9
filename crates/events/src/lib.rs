//! Job log routing and caller notification.
//!
//! - [`LogHub`] is the live log multiplexer: every job-tagged line is
//!   appended to a durable per-job file and forwarded to attached
//!   subscribers. A periodic [`LogHub::sweep`] enforces retention.
//! - [`delivery`] sends terminal job results to caller-supplied webhooks
//!   with bounded exponential-backoff retry.

pub mod delivery;
pub mod logs;

pub use delivery::webhook::{CallbackDelivery, RetryPolicy, WebhookError};
pub use logs::{LogHub, LogSubscription, SweepReport};
