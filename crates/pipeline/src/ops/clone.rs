use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sourcepin_core::context::{JobContext, JobState};
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::request::CloneRequest;
use sourcepin_core::result::CloneResult;
use sourcepin_git::client::RemoteRef;
use sourcepin_git::{classify, Git, GitSettings};

use super::{release, Pipeline};

const ORIGIN: &str = "origin";
const TARGET: &str = "target";

/// Prefix of the tag used to publish a bare commit id.
pub const COMMIT_TAG_PREFIX: &str = "commit-";

impl Pipeline {
    /// Mirror refs of an external repository into an internal one,
    /// preserving history.
    pub async fn clone_repo(&self, ctx: &JobContext, req: &CloneRequest) -> CoreResult<CloneResult> {
        ctx.set_state(JobState::AcquiringSource);
        let scratch = self.scratch("clone").await?;
        let result = sync_refs(
            ctx,
            &self.settings.git,
            scratch.path(),
            &req.origin_repo_url,
            &req.target_repo_url,
            req.reference.as_deref(),
        )
        .await?;
        release(ctx, scratch).await;
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Branch,
    Tag,
}

/// Find `reference` among advertised refs as a branch or a tag.
fn find_ref(refs: &[RemoteRef], reference: &str) -> Option<(RefKind, String)> {
    let branch = format!("refs/heads/{reference}");
    let tag = format!("refs/tags/{reference}");
    refs.iter().find_map(|r| {
        if r.name == branch {
            Some((RefKind::Branch, r.object.clone()))
        } else if r.name == tag {
            Some((RefKind::Tag, r.object.clone()))
        } else {
            None
        }
    })
}

static COMMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{7,40}$")
        .unwrap_or_else(|e| unreachable!("commit pattern is valid: {e}"))
});

fn looks_like_commit(reference: &str) -> bool {
    COMMIT.is_match(reference)
}

/// Sync one ref (or every branch and tag when `reference` is `None`) from
/// `origin` into `target`, using `dir` as a scratch repository.
///
/// A ref missing upstream but already present in `target` is used as is,
/// with a warning. A ref missing on both sides is [`CoreError::RefNotFound`].
pub async fn sync_refs(
    ctx: &JobContext,
    settings: &GitSettings,
    dir: &Path,
    origin: &str,
    target: &str,
    reference: Option<&str>,
) -> CoreResult<CloneResult> {
    tokio::fs::create_dir_all(dir).await?;
    let git = Git::new(ctx, dir, settings);
    git.init().await?;
    git.add_remote(ORIGIN, origin).await?;
    git.add_remote(TARGET, target).await?;

    let result = |reference: Option<&str>, commit: Option<String>| CloneResult {
        clone_type: "git".to_string(),
        reference: reference.map(str::to_string),
        commit,
        url: target.to_string(),
    };

    let Some(reference) = reference else {
        mirror_all(ctx, &git, origin, target).await?;
        return Ok(result(None, None));
    };

    let upstream = git.ls_remote(ORIGIN, &[]).await?;
    if let Some((kind, _)) = find_ref(&upstream, reference) {
        let commit = push_named_ref(ctx, &git, kind, reference, target).await?;
        return Ok(result(Some(reference), Some(commit)));
    }

    if looks_like_commit(reference) {
        let commit = push_commit(ctx, &git, reference, origin, target).await?;
        return Ok(result(Some(reference), Some(commit)));
    }

    let downstream = git.ls_remote(TARGET, &[]).await?;
    match find_ref(&downstream, reference) {
        Some((_, commit)) => {
            ctx.warn(format!(
                "{reference} not found in {origin}, using the copy already in {target}"
            ))
            .await;
            Ok(result(Some(reference), Some(commit)))
        }
        None => Err(CoreError::RefNotFound {
            reference: reference.to_string(),
            repo: origin.to_string(),
        }),
    }
}

async fn mirror_all(ctx: &JobContext, git: &Git<'_>, origin: &str, target: &str) -> CoreResult<()> {
    ctx.log(format!("Mirroring all branches and tags of {origin}"))
        .await;
    git.fetch(
        ORIGIN,
        &[
            "+refs/heads/*:refs/remotes/origin/*".to_string(),
            "+refs/tags/*:refs/tags/*".to_string(),
        ],
        "Could not fetch from origin",
    )
    .await?;

    ctx.set_state(JobState::Committing);
    ctx.log(format!("Pushing to {target}")).await;
    git.push(
        TARGET,
        &[
            "refs/remotes/origin/*:refs/heads/*".to_string(),
            "refs/tags/*:refs/tags/*".to_string(),
        ],
        false,
    )
    .await
}

async fn push_named_ref(
    ctx: &JobContext,
    git: &Git<'_>,
    kind: RefKind,
    reference: &str,
    target: &str,
) -> CoreResult<String> {
    let (fetch_spec, local, push_spec) = match kind {
        RefKind::Branch => (
            format!("+refs/heads/{reference}:refs/remotes/origin/{reference}"),
            format!("refs/remotes/origin/{reference}"),
            format!("refs/remotes/origin/{reference}:refs/heads/{reference}"),
        ),
        RefKind::Tag => (
            format!("+refs/tags/{reference}:refs/tags/{reference}"),
            format!("refs/tags/{reference}"),
            format!("refs/tags/{reference}:refs/tags/{reference}"),
        ),
    };

    git.fetch(ORIGIN, &[fetch_spec], "Could not fetch from origin")
        .await?;
    let commit = git.resolve_commit(&local).await?.ok_or_else(|| {
        CoreError::Internal(format!("{local} missing right after fetching it"))
    })?;

    ctx.set_state(JobState::Committing);
    ctx.log(format!("Pushing {reference} ({commit}) to {target}"))
        .await;
    git.push(TARGET, &[push_spec], false).await?;
    Ok(commit)
}

/// A bare commit id cannot be pushed as a ref, so it is published through
/// a lightweight `commit-<id>` tag.
async fn push_commit(
    ctx: &JobContext,
    git: &Git<'_>,
    reference: &str,
    origin: &str,
    target: &str,
) -> CoreResult<String> {
    let everything = [
        "+refs/heads/*:refs/remotes/origin/*".to_string(),
        "+refs/tags/*:refs/tags/*".to_string(),
    ];
    git.fetch(ORIGIN, &everything, "Could not fetch from origin")
        .await?;

    let mut commit = git.resolve_commit(reference).await?;
    if commit.is_none() {
        match git
            .fetch(ORIGIN, &[reference.to_string()], "Could not fetch commit")
            .await
        {
            Ok(()) => commit = git.resolve_commit("FETCH_HEAD").await?,
            Err(CoreError::Command(f)) if classify::is_ref_missing(&f.stderr) => {}
            Err(e) => return Err(e),
        }
    }

    let commit = match commit {
        Some(commit) => commit,
        None => {
            let found = downstream_commit(git, reference).await?;
            match found {
                Some(commit) => {
                    ctx.warn(format!(
                        "Commit {reference} not found in {origin}, using the copy already in {target}"
                    ))
                    .await;
                    return Ok(commit);
                }
                None => {
                    return Err(CoreError::RefNotFound {
                        reference: reference.to_string(),
                        repo: origin.to_string(),
                    })
                }
            }
        }
    };

    let tag = format!("{COMMIT_TAG_PREFIX}{commit}");
    if git.resolve_tag(&tag).await?.is_none() {
        git.tag_lightweight(&tag, &commit).await?;
    }

    ctx.set_state(JobState::Committing);
    ctx.log(format!("Pushing commit {commit} to {target} as tag {tag}"))
        .await;
    match git.push(TARGET, &[format!("refs/tags/{tag}")], false).await {
        Ok(()) => Ok(commit),
        // The tag name embeds the commit id, so an existing one is identical.
        Err(CoreError::Command(f)) if classify::is_remote_already_exists(&f.stderr) => Ok(commit),
        Err(e) => Err(e),
    }
}

async fn downstream_commit(git: &Git<'_>, reference: &str) -> CoreResult<Option<String>> {
    let specs = [
        "+refs/heads/*:refs/remotes/target/*".to_string(),
        "+refs/tags/*:refs/tags/*".to_string(),
    ];
    git.fetch(TARGET, &specs, "Could not fetch from target")
        .await?;
    git.resolve_commit(reference).await
}
