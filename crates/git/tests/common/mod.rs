#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sourcepin_core::context::{JobContext, LogSink};
use sourcepin_core::types::{DeploymentMode, InternalRepo, JobId, RepoUrls};
use sourcepin_git::{CommitIdentity, GitSettings, GitVersion};

/// Sink that keeps every published line for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn publish(&self, _job_id: &JobId, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

pub fn recording_context() -> (JobContext, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (JobContext::new(JobId::generate(), sink.clone()), sink)
}

pub async fn settings(mode: DeploymentMode) -> GitSettings {
    GitSettings::new(
        CommitIdentity::default(),
        GitVersion::detect().await.unwrap(),
        mode,
    )
}

pub fn old_client_settings() -> GitSettings {
    GitSettings::new(
        CommitIdentity::default(),
        GitVersion::parse("git version 2.1.4").unwrap(),
        DeploymentMode::Production,
    )
}

/// Run git synchronously for test fixtures, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@localhost"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Create a bare repository and describe it as an internal repository.
pub fn bare_repo(root: &Path, name: &str) -> InternalRepo {
    let path = root.join(format!("{name}.git"));
    std::fs::create_dir_all(&path).unwrap();
    git(&path, &["init", "-q", "--bare"]);
    let location = path.to_string_lossy().into_owned();
    InternalRepo {
        name: name.to_string(),
        urls: RepoUrls {
            readonly: format!("file://{location}"),
            readwrite: location,
        },
    }
}

/// Fresh scratch repository containing `files`.
pub fn work_tree(root: &Path, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "-q"]);
    write_files(&dir, files);
    dir
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
}

pub fn remote_tags(repo: &InternalRepo) -> Vec<String> {
    let out = git(Path::new(&repo.urls.readwrite), &["tag", "-l"]);
    out.lines().map(str::to_string).collect()
}

pub fn remote_commit_count(repo: &InternalRepo) -> usize {
    let out = git(Path::new(&repo.urls.readwrite), &["rev-list", "--all", "--count"]);
    out.parse().unwrap()
}

pub fn remote_resolve(repo: &InternalRepo, rev: &str) -> String {
    git(
        Path::new(&repo.urls.readwrite),
        &["rev-parse", &format!("{rev}^{{commit}}")],
    )
}
