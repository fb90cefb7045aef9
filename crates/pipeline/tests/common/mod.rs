#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use sourcepin_core::types::DeploymentMode;
use sourcepin_git::{CommitIdentity, GitSettings, GitVersion};
use sourcepin_pipeline::{AdjustPipeline, AdjustProvider, CommandProvider, Pipeline, PipelineSettings, RepoProvider};

/// Run git synchronously for fixtures, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@localhost",
            "-c",
            "commit.gpgSign=false",
            "-c",
            "tag.gpgSign=false",
        ])
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

pub fn write(dir: &Path, path: &str, content: &str) {
    let full = dir.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

/// Upstream repository on branch `main`:
/// commit 1 (tagged `v1.0`, annotated) then commit 2.
pub struct Upstream {
    pub dir: PathBuf,
    pub url: String,
    pub v1: String,
    pub head: String,
}

pub fn upstream(root: &Path) -> Upstream {
    let dir = root.join("upstream");
    std::fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "-q"]);
    git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    write(&dir, "pom.xml", "<version>1.0</version>\n");
    write(&dir, "src/main/App.java", "class App {}\n");
    git(&dir, &["add", "-A"]);
    git(&dir, &["commit", "-q", "-m", "Release 1.0"]);
    git(&dir, &["tag", "-a", "v1.0", "-m", "1.0"]);
    let v1 = git(&dir, &["rev-parse", "HEAD"]);

    write(&dir, "pom.xml", "<version>1.1-SNAPSHOT</version>\n");
    git(&dir, &["commit", "-q", "-am", "Next iteration"]);
    let head = git(&dir, &["rev-parse", "HEAD"]);

    Upstream {
        url: format!("file://{}", dir.display()),
        dir,
        v1,
        head,
    }
}

pub async fn git_settings() -> GitSettings {
    GitSettings::new(
        CommitIdentity::default(),
        GitVersion::detect().await.unwrap(),
        DeploymentMode::Production,
    )
}

pub fn work_dir(root: &Path) -> PathBuf {
    root.join("work")
}

pub fn repos_dir(root: &Path) -> PathBuf {
    root.join("repos")
}

pub fn internal(root: &Path, name: &str) -> PathBuf {
    repos_dir(root).join(format!("{name}.git"))
}

pub async fn pipeline(root: &Path, aligners: AdjustPipeline) -> Pipeline {
    let settings = PipelineSettings {
        work_dir: work_dir(root),
        git: git_settings().await,
    };
    Pipeline::new(
        settings,
        RepoProvider::Local {
            root: repos_dir(root),
        },
        aligners,
    )
    .unwrap()
}

/// A single shell-script alignment provider for build type `maven`.
pub fn shell_aligner(script: &str) -> AdjustPipeline {
    AdjustPipeline::new(Some("maven".to_string())).with_provider(
        "maven",
        AdjustProvider::Command(CommandProvider::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
        )),
    )
}

/// Names in a repository matching `pattern` (`git for-each-ref` style).
pub fn refs(repo: &Path, pattern: &str) -> Vec<String> {
    let out = git(repo, &["for-each-ref", "--format=%(refname:strip=2)", pattern]);
    out.lines().map(str::to_string).collect()
}

pub fn commit_count(repo: &Path) -> usize {
    let out = git(repo, &["rev-list", "--all", "--count"]);
    out.parse().unwrap()
}

pub fn rev_parse(repo: &Path, rev: &str) -> String {
    git(repo, &["rev-parse", rev])
}

pub fn is_empty_dir(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
