//! SHA-256 digests used to correlate caller-visible errors with server logs.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Digest of a captured stack trace.
///
/// The digest is returned to callers as `error_traceback` and logged next
/// to the full trace, so an operator can find the trace without it being
/// exposed over HTTP.
pub fn traceback_digest(trace: &str) -> String {
    sha256_hex(trace.as_bytes())
}
