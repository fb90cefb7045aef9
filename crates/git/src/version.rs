//! Git client version detection.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::process::{self, ProcessSpec};

/// First client version that understands `git push --atomic`.
pub const ATOMIC_PUSH_MIN_VERSION: GitVersion = GitVersion {
    major: 2,
    minor: 4,
    patch: 0,
};

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?")
        .unwrap_or_else(|e| unreachable!("version pattern is valid: {e}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    /// Parse the output of `git --version`, e.g.
    /// `git version 2.39.2` or `git version 2.20.1.windows.1`.
    pub fn parse(output: &str) -> Option<Self> {
        let caps = VERSION.captures(output)?;
        Some(Self {
            major: caps.get(1)?.as_str().parse().ok()?,
            minor: caps.get(2)?.as_str().parse().ok()?,
            patch: caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
        })
    }

    pub fn supports_atomic_push(self) -> bool {
        self >= ATOMIC_PUSH_MIN_VERSION
    }

    /// Run `git --version` once, typically at startup.
    pub async fn detect() -> CoreResult<Self> {
        let ctx = JobContext::detached();
        let out = process::run(
            &ctx,
            ProcessSpec::new("git")
                .arg("--version")
                .quiet()
                .describe("Could not run the git client"),
        )
        .await?;
        Self::parse(&out.stdout).ok_or_else(|| {
            CoreError::Config(format!(
                "unrecognised git version output '{}'",
                out.stdout.trim()
            ))
        })
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_outputs() {
        assert_eq!(
            GitVersion::parse("git version 2.39.2\n"),
            Some(GitVersion { major: 2, minor: 39, patch: 2 })
        );
        assert_eq!(
            GitVersion::parse("git version 2.20.1.windows.1"),
            Some(GitVersion { major: 2, minor: 20, patch: 1 })
        );
        assert_eq!(
            GitVersion::parse("git version 1.8"),
            Some(GitVersion { major: 1, minor: 8, patch: 0 })
        );
        assert_eq!(GitVersion::parse("not git"), None);
    }

    #[test]
    fn atomic_push_threshold() {
        assert!(!GitVersion::parse("git version 1.9.5").unwrap().supports_atomic_push());
        assert!(!GitVersion::parse("git version 2.3.10").unwrap().supports_atomic_push());
        assert!(GitVersion::parse("git version 2.4.0").unwrap().supports_atomic_push());
        assert!(GitVersion::parse("git version 2.43.0").unwrap().supports_atomic_push());
    }

    #[tokio::test]
    async fn detects_installed_client() {
        let version = GitVersion::detect().await.unwrap();
        assert!(version.major >= 1);
    }
}
