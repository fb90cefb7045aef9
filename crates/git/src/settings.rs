use sourcepin_core::types::DeploymentMode;

use crate::version::GitVersion;

/// Author and committer date used for deterministic commits:
/// 2000-01-01T00:00:00Z in git's internal `<unix-seconds> <offset>` format.
pub const PINNED_COMMIT_DATE: &str = "946684800 +0000";

/// Identity recorded on every commit and tag this service creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "Sourcepin".to_string(),
            email: "sourcepin@localhost".to_string(),
        }
    }
}

/// Immutable git-related settings, built once at startup.
#[derive(Debug, Clone)]
pub struct GitSettings {
    pub identity: CommitIdentity,
    pub client_version: GitVersion,
    pub deployment_mode: DeploymentMode,
}

impl GitSettings {
    pub fn new(
        identity: CommitIdentity,
        client_version: GitVersion,
        deployment_mode: DeploymentMode,
    ) -> Self {
        Self {
            identity,
            client_version,
            deployment_mode,
        }
    }

    /// Whether to attempt `push --atomic`. The server may still refuse.
    pub fn atomic_push(&self) -> bool {
        self.client_version.supports_atomic_push()
    }
}
