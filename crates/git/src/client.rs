//! Typed wrappers over individual git subcommands.
//!
//! Every call goes through [`sourcepin_core::process::run`], so each one is
//! a cancellation check point and streams its output into the job log.

use std::path::Path;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::process::{self, ProcessOutput, ProcessSpec};

use crate::classify;
use crate::settings::{GitSettings, PINNED_COMMIT_DATE};

/// Object id of the empty tree.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// A tag and what it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub commit: String,
    pub tree: String,
}

/// A ref advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub object: String,
    pub name: String,
}

/// Git client bound to one working directory of one job.
pub struct Git<'a> {
    ctx: &'a JobContext,
    dir: &'a Path,
    settings: &'a GitSettings,
}

impl<'a> Git<'a> {
    pub fn new(ctx: &'a JobContext, dir: &'a Path, settings: &'a GitSettings) -> Self {
        Self { ctx, dir, settings }
    }

    pub fn settings(&self) -> &GitSettings {
        self.settings
    }

    fn spec<I, S>(&self, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identity = &self.settings.identity;
        ProcessSpec::new("git")
            .args(["-c", "commit.gpgSign=false", "-c", "tag.gpgSign=false"])
            .args(args)
            .cwd(self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", identity.name.as_str())
            .env("GIT_AUTHOR_EMAIL", identity.email.as_str())
            .env("GIT_COMMITTER_NAME", identity.name.as_str())
            .env("GIT_COMMITTER_EMAIL", identity.email.as_str())
    }

    /// Run a git subcommand, forwarding all output to the job log.
    pub async fn run<I, S>(&self, args: I, desc: &str) -> CoreResult<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        process::run(self.ctx, self.spec(args).describe(desc)).await
    }

    /// Run a plumbing query and return its trimmed stdout.
    pub async fn query<I, S>(&self, args: I, desc: &str) -> CoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let out = process::run(self.ctx, self.spec(args).quiet().describe(desc)).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Like [`Git::query`] but a non-zero exit yields `None`.
    pub async fn try_query<I, S>(&self, args: I) -> CoreResult<Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match process::run(self.ctx, self.spec(args).quiet()).await {
            Ok(out) => Ok(Some(out.stdout.trim().to_string())),
            Err(CoreError::Command(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    // -----------------------------------------------------------------------
    // Repository setup
    // -----------------------------------------------------------------------

    pub async fn init(&self) -> CoreResult<()> {
        self.run(["init", "-q"], "Could not initialise repository")
            .await?;
        Ok(())
    }

    pub async fn init_bare(&self, path: &Path) -> CoreResult<()> {
        self.run(
            [
                "init".to_string(),
                "-q".to_string(),
                "--bare".to_string(),
                path.to_string_lossy().into_owned(),
            ],
            "Could not provision internal repository",
        )
        .await?;
        Ok(())
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> CoreResult<()> {
        self.run(["remote", "add", name, url], "Could not add remote")
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Index, trees and commits
    // -----------------------------------------------------------------------

    /// Stage every file in the working tree, ignored files included.
    pub async fn stage_all(&self) -> CoreResult<()> {
        self.run(["add", "-A", "-f", "."], "Could not stage files")
            .await?;
        Ok(())
    }

    /// Object id of the tree currently staged in the index.
    pub async fn write_tree(&self) -> CoreResult<String> {
        self.query(["write-tree"], "Could not write tree").await
    }

    /// Current `HEAD` commit, or `None` on an unborn branch.
    pub async fn head_commit(&self) -> CoreResult<Option<String>> {
        self.try_query(["rev-parse", "--verify", "-q", "HEAD^{commit}"])
            .await
    }

    pub async fn tree_of(&self, commit: &str) -> CoreResult<String> {
        self.query(
            ["rev-parse".to_string(), format!("{commit}^{{tree}}")],
            "Could not resolve tree",
        )
        .await
    }

    /// Resolve any revision to a commit id, if it exists locally.
    pub async fn resolve_commit(&self, rev: &str) -> CoreResult<Option<String>> {
        self.try_query([
            "rev-parse".to_string(),
            "--verify".to_string(),
            "-q".to_string(),
            format!("{rev}^{{commit}}"),
        ])
        .await
    }

    /// Commit id a local tag points at, if the tag exists.
    pub async fn resolve_tag(&self, name: &str) -> CoreResult<Option<String>> {
        self.resolve_commit(&format!("refs/tags/{name}")).await
    }

    /// Commit the index. Dates are pinned unless `real_time` is set.
    pub async fn commit(&self, message: &str, real_time: bool) -> CoreResult<String> {
        let mut spec = self
            .spec(["commit", "-q", "--no-verify", "--allow-empty-message", "-m", message])
            .describe("Could not commit");
        if !real_time {
            spec = spec
                .env("GIT_AUTHOR_DATE", PINNED_COMMIT_DATE)
                .env("GIT_COMMITTER_DATE", PINNED_COMMIT_DATE);
        }
        process::run(self.ctx, spec).await?;
        self.head_commit().await?.ok_or_else(|| {
            CoreError::Internal("HEAD is unborn right after a commit".to_string())
        })
    }

    pub async fn tag_annotated(&self, name: &str, message: &str, commit: &str) -> CoreResult<()> {
        self.run(["tag", "-a", name, "-m", message, commit], "Could not create tag")
            .await?;
        Ok(())
    }

    pub async fn tag_lightweight(&self, name: &str, commit: &str) -> CoreResult<()> {
        self.run(["tag", name, commit], "Could not create tag")
            .await?;
        Ok(())
    }

    /// All local tags with their commit and tree, oldest first.
    pub async fn tags(&self) -> CoreResult<Vec<TagEntry>> {
        let spec = self
            .spec([
                "for-each-ref",
                "--sort=creatordate",
                "--format=%(refname:strip=2)%09%(objectname)%09%(*objectname)%09%(tree)%09%(*tree)",
                "refs/tags",
            ])
            .quiet()
            .describe("Could not list tags");
        // Untrimmed: trailing empty columns are significant.
        let out = process::run(self.ctx, spec).await?;
        Ok(parse_tag_listing(&out.stdout))
    }

    // -----------------------------------------------------------------------
    // Branches and HEAD
    // -----------------------------------------------------------------------

    pub async fn checkout_new_branch(&self, name: &str) -> CoreResult<()> {
        self.run(["checkout", "-q", "-b", name], "Could not create branch")
            .await?;
        Ok(())
    }

    /// Point `HEAD` at a new unborn branch, keeping index and working tree.
    pub async fn orphan_branch(&self, name: &str) -> CoreResult<()> {
        self.run(
            ["symbolic-ref".to_string(), "HEAD".to_string(), format!("refs/heads/{name}")],
            "Could not create orphan branch",
        )
        .await?;
        Ok(())
    }

    pub async fn checkout(&self, rev: &str) -> CoreResult<()> {
        self.run(["checkout", "-q", "--detach", rev], "Could not check out ref")
            .await?;
        Ok(())
    }

    /// Detach `HEAD` at `commit` without touching index or working tree.
    pub async fn detach_at(&self, commit: &str) -> CoreResult<()> {
        self.run(
            ["update-ref", "--no-deref", "HEAD", commit],
            "Could not move HEAD",
        )
        .await?;
        Ok(())
    }

    pub async fn delete_branch(&self, name: &str) -> CoreResult<()> {
        self.run(["branch", "-q", "-D", name], "Could not delete branch")
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Network operations
    // -----------------------------------------------------------------------

    /// Refs advertised by `remote` (a remote name or URL).
    pub async fn ls_remote(&self, remote: &str, extra: &[&str]) -> CoreResult<Vec<RemoteRef>> {
        let mut args = vec!["ls-remote".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        args.push(remote.to_string());
        let out = self
            .query(args, "Could not list remote refs")
            .await
            .map_err(classify::remap_user_error)?;
        Ok(parse_ls_remote(&out))
    }

    pub async fn fetch(&self, remote: &str, refspecs: &[String], desc: &str) -> CoreResult<()> {
        let mut args = vec!["fetch".to_string(), "-q".to_string(), "--no-tags".to_string()];
        args.push(remote.to_string());
        args.extend(refspecs.iter().cloned());
        self.run(args, desc).await.map_err(classify::remap_user_error)?;
        Ok(())
    }

    /// Mirror every tag of `remote` into the local repository.
    pub async fn fetch_tags(&self, remote: &str) -> CoreResult<()> {
        if self.ls_remote(remote, &["--tags"]).await?.is_empty() {
            return Ok(());
        }
        self.fetch(
            remote,
            &["+refs/tags/*:refs/tags/*".to_string()],
            "Could not fetch tags",
        )
        .await
    }

    pub async fn push(&self, remote: &str, refspecs: &[String], atomic: bool) -> CoreResult<()> {
        let mut args = vec!["push".to_string()];
        if atomic {
            args.push("--atomic".to_string());
        }
        args.push(remote.to_string());
        args.extend(refspecs.iter().cloned());
        self.run(args, "Could not push to repository").await?;
        Ok(())
    }
}

/// Parse tab-separated `for-each-ref` output. Annotated tags carry the
/// commit and tree in the peeled (`*`) columns, lightweight tags in the
/// direct ones. Tags pointing at non-commits are skipped.
fn parse_tag_listing(out: &str) -> Vec<TagEntry> {
    out.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            let &[name, object, peeled, tree, peeled_tree] = fields.as_slice() else {
                return None;
            };
            let (commit, tree) = if !peeled_tree.is_empty() {
                (peeled, peeled_tree)
            } else if !tree.is_empty() {
                (object, tree)
            } else {
                return None;
            };
            Some(TagEntry {
                name: name.to_string(),
                commit: commit.to_string(),
                tree: tree.to_string(),
            })
        })
        .collect()
}

/// Parse `ls-remote` output. Peeled `^{}` entries replace the tag object
/// id with the commit id it points at.
fn parse_ls_remote(out: &str) -> Vec<RemoteRef> {
    let mut refs: Vec<RemoteRef> = Vec::new();
    for line in out.lines() {
        let Some((object, name)) = line.split_once('\t') else {
            continue;
        };
        if let Some(base) = name.strip_suffix("^{}") {
            if let Some(existing) = refs.iter_mut().find(|r| r.name == base) {
                existing.object = object.to_string();
            }
            continue;
        }
        refs.push(RemoteRef {
            object: object.to_string(),
            name: name.to_string(),
        });
    }
    refs
}
