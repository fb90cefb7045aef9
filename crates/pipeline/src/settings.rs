use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use sourcepin_git::GitSettings;

/// Immutable pipeline configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent directory of every scratch working tree.
    pub work_dir: PathBuf,
    pub git: GitSettings,
}

/// Source of the `<n>` in `pull-<n>` and `adjust-<n>` branch names.
///
/// Seeded from the wall clock in milliseconds, then strictly increasing,
/// so names stay unique across restarts and across concurrent jobs.
#[derive(Debug)]
pub struct Sequence(AtomicU64);

impl Sequence {
    pub fn new() -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self(AtomicU64::new(seed))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_strictly_increasing() {
        let seq = Sequence::new();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a);
    }
}
