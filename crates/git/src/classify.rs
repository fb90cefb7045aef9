//! Classification of git failures by their stderr.
//!
//! Matching on git's human-readable messages is fragile, so it is only
//! used where there is no query-able precondition: the server's atomic
//! push support can only be learned by trying, and a remote "already
//! exists" rejection can race with a concurrent writer after our own
//! pre-flight check passed.

use sourcepin_core::error::{CommandFailure, CoreError};

/// The client or the receiving end does not understand `--atomic`.
pub fn is_atomic_unsupported(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("does not support --atomic")
        || stderr.contains("unknown option `atomic'")
        || stderr.contains("unknown option 'atomic'")
}

/// A push was rejected because a ref (usually a tag) already exists on
/// the remote.
pub fn is_remote_already_exists(stderr: &str) -> bool {
    stderr.contains("(already exists)")
}

/// The requested ref or object is not available from the remote.
pub fn is_ref_missing(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("couldn't find remote ref")
        || stderr.contains("not found in upstream")
        || stderr.contains("not our ref")
        || stderr.contains("unadvertised object")
        || stderr.contains("did not match any file(s) known to git")
        || stderr.contains("unknown revision")
        || stderr.contains("invalid reference")
}

/// The repository itself is unreachable because of the caller's input.
pub fn is_repository_missing(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("repository not found")
        || stderr.contains("does not appear to be a git repository")
        || stderr.contains("could not read from remote repository")
        || stderr.contains("authentication failed")
        || stderr.contains("could not resolve host")
}

/// Remap failures caused by caller input to the user-error exit code.
pub fn remap_user_error(err: CoreError) -> CoreError {
    match err {
        CoreError::Command(failure) if is_user_facing(&failure) => {
            CoreError::Command(failure.into_user_error())
        }
        other => other,
    }
}

fn is_user_facing(failure: &CommandFailure) -> bool {
    is_repository_missing(&failure.stderr) || is_ref_missing(&failure.stderr)
}
