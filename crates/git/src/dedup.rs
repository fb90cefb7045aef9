//! Content-addressed commits into an internal repository.
//!
//! [`commit_and_dedup`] turns a prepared working tree into a canonical
//! `(branch, tag, commit)`. When content-addressing is requested, the
//! staged tree id is looked up among the repository's tags first, so the
//! git object store itself acts as the cache: one durable tag per distinct
//! tree, no matter how many times the same input is processed.
//!
//! Concurrent jobs may write to the same repository. No lock is taken;
//! git's ref updates are atomic and "already exists" outcomes are
//! re-checked against the remote before being accepted.

use std::path::Path;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::result::InternalReference;
use sourcepin_core::types::InternalRepo;

use crate::classify;
use crate::client::{Git, TagEntry, EMPTY_TREE};
use crate::settings::GitSettings;

/// Length of the commit-id suffix appended to colliding tag names.
const TAG_SUFFIX_LEN: usize = 8;

/// Knobs for one [`commit_and_dedup`] call.
#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Branch to publish the commit on.
    pub branch: String,
    /// Look for an existing tag with an identical tree before committing.
    pub content_addressing: bool,
    /// An unchanged tree is acceptable rather than an error.
    pub no_change_ok: bool,
    /// With `no_change_ok`, still tag and push `HEAD` when nothing changed.
    pub force_continue_on_no_change: bool,
    /// Record wall-clock commit dates instead of the pinned date.
    pub use_real_commit_time: bool,
    /// Tag name to use instead of `<operation>-<commit>`.
    pub specific_tag_name: Option<String>,
}

impl DedupOptions {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            content_addressing: true,
            no_change_ok: false,
            force_continue_on_no_change: false,
            use_real_commit_time: false,
            specific_tag_name: None,
        }
    }

    pub fn no_change_ok(mut self) -> Self {
        self.no_change_ok = true;
        self
    }

    pub fn force_continue(mut self) -> Self {
        self.no_change_ok = true;
        self.force_continue_on_no_change = true;
        self
    }

    pub fn without_content_addressing(mut self) -> Self {
        self.content_addressing = false;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.specific_tag_name = Some(tag.into());
        self
    }
}

/// Commit the working tree at `work_tree` into `repo`.
///
/// Returns `None` only when `no_change_ok` is set without
/// `force_continue_on_no_change` and there was nothing to commit. On
/// success `HEAD` is left detached at the returned commit, so a following
/// call produces a child of it.
pub async fn commit_and_dedup(
    ctx: &JobContext,
    settings: &GitSettings,
    work_tree: &Path,
    repo: &InternalRepo,
    op_name: &str,
    op_description: &str,
    options: &DedupOptions,
) -> CoreResult<Option<InternalReference>> {
    let git = Git::new(ctx, work_tree, settings);

    git.stage_all().await?;
    let head = git.head_commit().await?;
    let temp_branch = format!("sourcepin-tmp-{}", uuid::Uuid::new_v4().simple());
    match head {
        Some(_) => git.checkout_new_branch(&temp_branch).await?,
        None => git.orphan_branch(&temp_branch).await?,
    }

    let outcome = Dedup {
        git: &git,
        ctx,
        repo,
        op_name,
        op_description,
        options,
        head: head.as_deref(),
    }
    .run()
    .await;

    remove_temp_branch(&git, &temp_branch).await;
    outcome
}

/// Best effort: move `HEAD` off the temporary branch and delete it.
async fn remove_temp_branch(git: &Git<'_>, temp_branch: &str) {
    let result = async {
        if let Some(commit) = git.head_commit().await? {
            git.detach_at(&commit).await?;
        }
        git.delete_branch(temp_branch).await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!(branch = temp_branch, error = %e, "Temporary branch not removed");
    }
}

struct Dedup<'a> {
    git: &'a Git<'a>,
    ctx: &'a JobContext,
    repo: &'a InternalRepo,
    op_name: &'a str,
    op_description: &'a str,
    options: &'a DedupOptions,
    head: Option<&'a str>,
}

impl Dedup<'_> {
    async fn run(&self) -> CoreResult<Option<InternalReference>> {
        let remote = self.repo.urls.readwrite.as_str();
        let tree = self.git.write_tree().await?;

        // Local tags must mirror the internal repository for both the
        // tree lookup and the tag collision checks below.
        self.git.fetch_tags(remote).await?;

        if self.options.content_addressing {
            if let Some(existing) = self.find_tag_for_tree(&tree).await? {
                return self.reuse_existing(existing).await.map(Some);
            }
        }

        let commit = match self.commit_if_changed(&tree).await? {
            Some(commit) => commit,
            None => return Ok(None),
        };

        let (tag, tag_exists) = self.choose_tag_name(&commit).await?;
        if tag_exists {
            self.ctx
                .log(format!("Tag {tag} already exists for {commit}, continuing"))
                .await;
        } else {
            self.git
                .tag_annotated(&tag, self.op_description, &commit)
                .await?;
        }

        self.push(&commit, &tag).await?;
        self.git.detach_at(&commit).await?;

        self.ctx
            .log(format!(
                "{} committed as {commit} on branch {} with tag {tag}",
                self.op_name, self.options.branch
            ))
            .await;

        Ok(Some(InternalReference {
            branch: self.options.branch.clone(),
            tag,
            commit,
            url: self.repo.urls.clone(),
        }))
    }

    /// Oldest tag whose commit has exactly this tree. Tree identity is the
    /// only criterion; the tag's lineage is not consulted.
    async fn find_tag_for_tree(&self, tree: &str) -> CoreResult<Option<TagEntry>> {
        let tags = self.git.tags().await?;
        Ok(tags.into_iter().find(|t| t.tree == tree))
    }

    async fn reuse_existing(&self, existing: TagEntry) -> CoreResult<InternalReference> {
        if !self.options.no_change_ok {
            return Err(CoreError::ContentUnchanged(format!(
                "{} produced no new content; identical tree already tagged as {}",
                self.op_name, existing.name
            )));
        }
        self.ctx
            .log(format!(
                "Content already present as tag {} ({}), reusing it",
                existing.name, existing.commit
            ))
            .await;

        // Re-push the tag: it may have been found through a path the
        // internal repository has not seen yet.
        let refspec = format!("refs/tags/{}", existing.name);
        if let Err(e) = self
            .git
            .push(&self.repo.urls.readwrite, &[refspec], false)
            .await
        {
            match &e {
                CoreError::Command(f) if classify::is_remote_already_exists(&f.stderr) => {}
                _ => return Err(e),
            }
        }
        self.git.detach_at(&existing.commit).await?;

        Ok(InternalReference {
            branch: existing.name.clone(),
            tag: existing.name,
            commit: existing.commit,
            url: self.repo.urls.clone(),
        })
    }

    /// Commit the staged tree, or decide what "nothing to commit" means.
    /// Returns `None` when the caller should receive no reference.
    async fn commit_if_changed(&self, tree: &str) -> CoreResult<Option<String>> {
        let unchanged = match self.head {
            Some(head) => self.git.tree_of(head).await? == tree,
            None => tree == EMPTY_TREE,
        };

        if !unchanged {
            let commit = self
                .git
                .commit(self.op_description, self.options.use_real_commit_time)
                .await?;
            return Ok(Some(commit));
        }

        if !self.options.no_change_ok {
            return Err(CoreError::ContentUnchanged(format!(
                "{} produced nothing to commit",
                self.op_name
            )));
        }
        let Some(head) = self.head else {
            return Err(CoreError::ContentUnchanged(format!(
                "{} produced an empty tree",
                self.op_name
            )));
        };
        if !self.options.force_continue_on_no_change {
            self.ctx.log("Nothing to commit").await;
            return Ok(None);
        }
        self.ctx
            .log(format!("Nothing to commit, tagging existing commit {head}"))
            .await;
        Ok(Some(head.to_string()))
    }

    /// Pick the tag name and report whether it already points at `commit`.
    async fn choose_tag_name(&self, commit: &str) -> CoreResult<(String, bool)> {
        let suffix = &commit[..TAG_SUFFIX_LEN.min(commit.len())];
        let base = self
            .options
            .specific_tag_name
            .clone()
            .unwrap_or_else(|| format!("{}-{commit}", self.op_name.to_lowercase()));

        let mut tag = if self.git.settings().deployment_mode.is_production() {
            base
        } else {
            format!("{base}-{suffix}")
        };

        match self.git.resolve_tag(&tag).await? {
            None => return Ok((tag, false)),
            Some(existing) if existing == commit => return self.accept_existing_tag(tag),
            Some(_) => {}
        }

        if tag.ends_with(&format!("-{suffix}")) {
            return Err(CoreError::Internal(format!(
                "tag {tag} already exists and points at a different commit"
            )));
        }
        tag = format!("{tag}-{suffix}");
        self.ctx
            .log(format!("Tag name collision, using {tag} instead"))
            .await;

        match self.git.resolve_tag(&tag).await? {
            None => Ok((tag, false)),
            Some(existing) if existing == commit => self.accept_existing_tag(tag),
            Some(_) => Err(CoreError::Internal(format!(
                "tag {tag} already exists and points at a different commit"
            ))),
        }
    }

    fn accept_existing_tag(&self, tag: String) -> CoreResult<(String, bool)> {
        if self.options.force_continue_on_no_change {
            Ok((tag, true))
        } else {
            Err(CoreError::ContentUnchanged(format!(
                "tag {tag} already exists for this commit"
            )))
        }
    }

    /// Push branch and tag, atomically when both sides allow it.
    async fn push(&self, commit: &str, tag: &str) -> CoreResult<()> {
        let remote = self.repo.urls.readwrite.as_str();
        let refspecs = vec![
            format!("{commit}:refs/heads/{}", self.options.branch),
            format!("refs/tags/{tag}"),
        ];

        let result = if self.git.settings().atomic_push() {
            match self.git.push(remote, &refspecs, true).await {
                Err(CoreError::Command(f)) if classify::is_atomic_unsupported(&f.stderr) => {
                    self.warn_non_atomic("the server does not support atomic push")
                        .await;
                    self.git.push(remote, &refspecs, false).await
                }
                other => other,
            }
        } else {
            self.warn_non_atomic(&format!(
                "git client {} is older than 2.4",
                self.git.settings().client_version
            ))
            .await;
            self.git.push(remote, &refspecs, false).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(CoreError::Command(f))
                if self.options.no_change_ok && classify::is_remote_already_exists(&f.stderr) =>
            {
                self.confirm_remote_tag(tag, commit).await?;
                // The rejected transaction carried the branch too.
                self.push_branch(commit).await
            }
            Err(e) => Err(e),
        }
    }

    /// Publish only the branch, after the tag was found already in place.
    async fn push_branch(&self, commit: &str) -> CoreResult<()> {
        let refspec = format!("{commit}:refs/heads/{}", self.options.branch);
        match self
            .git
            .push(&self.repo.urls.readwrite, &[refspec], false)
            .await
        {
            Err(CoreError::Command(f)) if classify::is_remote_already_exists(&f.stderr) => Ok(()),
            other => other,
        }
    }

    /// A concurrent writer published the tag first. Accept only if it
    /// points at the same commit.
    async fn confirm_remote_tag(&self, tag: &str, commit: &str) -> CoreResult<()> {
        let remote = self.repo.urls.readwrite.as_str();
        let refs = self
            .git
            .ls_remote(remote, &["--tags"])
            .await?;
        let wanted = format!("refs/tags/{tag}");
        match refs.iter().find(|r| r.name == wanted) {
            Some(r) if r.object == commit => {
                self.ctx
                    .log(format!("Tag {tag} already published, nothing to push"))
                    .await;
                Ok(())
            }
            _ => Err(CoreError::Internal(format!(
                "tag {tag} was published concurrently for a different commit"
            ))),
        }
    }

    async fn warn_non_atomic(&self, reason: &str) {
        self.ctx
            .warn(format!(
                "Pushing without --atomic because {reason}; branch and tag may become inconsistent if the push is interrupted"
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use assert_matches::assert_matches;
    use sourcepin_core::types::{DeploymentMode, RepoUrls};

    use super::*;
    use crate::settings::CommitIdentity;
    use crate::version::GitVersion;

    fn git(dir: &Path, args: &[&str]) -> String {
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

    #[tokio::test]
    async fn tag_published_concurrently_still_pushes_branch() {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("widget.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "-q", "--bare"]);
        let work = root.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q"]);
        std::fs::write(work.join("a.txt"), "a\n").unwrap();
        git(&work, &["add", "-A"]);
        git(&work, &["commit", "-q", "-m", "Pull"]);
        let commit = git(&work, &["rev-parse", "HEAD"]);

        // Another writer already published the commit and a tag for it,
        // after this job mirrored the remote tags.
        let location = remote.to_string_lossy().into_owned();
        git(&work, &["push", "-q", &location, &format!("{commit}:refs/heads/other")]);
        git(&remote, &["tag", "pull-1-root", &commit]);
        git(&work, &["tag", "-a", "pull-1-root", "-m", "Pull", &commit]);

        let settings = GitSettings::new(
            CommitIdentity::default(),
            GitVersion::detect().await.unwrap(),
            DeploymentMode::Production,
        );
        let ctx = JobContext::detached();
        let client = Git::new(&ctx, &work, &settings);
        let repo = InternalRepo {
            name: "widget".into(),
            urls: RepoUrls {
                readonly: format!("file://{location}"),
                readwrite: location.clone(),
            },
        };
        let options = DedupOptions::new("pull-1").no_change_ok();
        let dedup = Dedup {
            git: &client,
            ctx: &ctx,
            repo: &repo,
            op_name: "Pull",
            op_description: "Pull",
            options: &options,
            head: None,
        };

        dedup.push(&commit, "pull-1-root").await.unwrap();

        assert_eq!(git(&remote, &["rev-parse", "refs/heads/pull-1"]), commit);
    }

    #[tokio::test]
    async fn tag_published_for_other_commit_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("widget.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "-q", "--bare"]);
        let work = root.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q"]);
        std::fs::write(work.join("a.txt"), "a\n").unwrap();
        git(&work, &["add", "-A"]);
        git(&work, &["commit", "-q", "-m", "first"]);
        let first = git(&work, &["rev-parse", "HEAD"]);
        std::fs::write(work.join("a.txt"), "b\n").unwrap();
        git(&work, &["commit", "-q", "-am", "second"]);
        let second = git(&work, &["rev-parse", "HEAD"]);

        let location = remote.to_string_lossy().into_owned();
        git(&work, &["push", "-q", &location, &format!("{first}:refs/heads/other")]);
        git(&remote, &["tag", "pull-1-root", &first]);
        git(&work, &["tag", "pull-1-root", &second]);

        let settings = GitSettings::new(
            CommitIdentity::default(),
            GitVersion::detect().await.unwrap(),
            DeploymentMode::Production,
        );
        let ctx = JobContext::detached();
        let client = Git::new(&ctx, &work, &settings);
        let repo = InternalRepo {
            name: "widget".into(),
            urls: RepoUrls {
                readonly: format!("file://{location}"),
                readwrite: location,
            },
        };
        let options = DedupOptions::new("pull-1").no_change_ok();
        let dedup = Dedup {
            git: &client,
            ctx: &ctx,
            repo: &repo,
            op_name: "Pull",
            op_description: "Pull",
            options: &options,
            head: None,
        };

        let err = dedup.push(&second, "pull-1-root").await.unwrap_err();

        assert_matches!(err, CoreError::Internal(_));
        assert!(Command::new("git")
            .args(["rev-parse", "--verify", "-q", "refs/heads/pull-1"])
            .current_dir(&remote)
            .output()
            .map(|o| !o.status.success())
            .unwrap());
    }
}
