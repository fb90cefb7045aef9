use std::path::Path;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::process::{self, ProcessSpec};
use sourcepin_git::{classify, Git, GitSettings};

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parent_of(dest: &Path) -> CoreResult<&Path> {
    dest.parent()
        .ok_or_else(|| CoreError::Internal(format!("{} has no parent", dest.display())))
}

/// Clone with the cheapest strategy that reaches `reference`: a shallow
/// clone of a branch or tag, then a full clone and checkout, then a
/// direct fetch of an unadvertised commit id.
pub(super) async fn git(
    ctx: &JobContext,
    settings: &GitSettings,
    url: &str,
    reference: Option<&str>,
    dest: &Path,
) -> CoreResult<()> {
    let outside = Git::new(ctx, parent_of(dest)?, settings);
    let dest_arg = path_arg(dest);

    let Some(reference) = reference else {
        outside
            .run(
                ["clone", "-q", "--depth", "1", "--", url, dest_arg.as_str()],
                "Could not clone repository",
            )
            .await
            .map_err(classify::remap_user_error)?;
        return Ok(());
    };

    let shallow = outside
        .run(
            ["clone", "-q", "--depth", "1", "--branch", reference, "--", url, dest_arg.as_str()],
            "Could not clone repository",
        )
        .await;
    match shallow {
        Ok(_) => return Ok(()),
        Err(CoreError::Command(failure)) => {
            tracing::debug!(job_id = %ctx.job_id(), stderr = %failure.stderr, "Shallow clone failed");
            ctx.log(format!(
                "Shallow clone of {reference} failed, falling back to a full clone"
            ))
            .await;
        }
        Err(e) => return Err(e),
    }

    if tokio::fs::try_exists(dest).await? {
        tokio::fs::remove_dir_all(dest).await?;
    }
    outside
        .run(["clone", "-q", "--", url, dest_arg.as_str()], "Could not clone repository")
        .await
        .map_err(classify::remap_user_error)?;

    let inside = Git::new(ctx, dest, settings);
    for candidate in [reference.to_string(), format!("origin/{reference}")] {
        if let Some(commit) = inside.resolve_commit(&candidate).await? {
            return inside.checkout(&commit).await;
        }
    }

    ctx.log(format!(
        "{reference} is not reachable from any advertised ref, fetching it directly"
    ))
    .await;
    match inside
        .fetch("origin", &[reference.to_string()], "Could not fetch ref")
        .await
    {
        Ok(()) => inside.checkout("FETCH_HEAD").await,
        Err(CoreError::Command(failure)) if classify::is_ref_missing(&failure.stderr) => {
            Err(CoreError::RefNotFound {
                reference: reference.to_string(),
                repo: url.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Failures of hg and svn checkouts are attributed to the caller's URL or
/// revision.
fn user_facing(err: CoreError) -> CoreError {
    match err {
        CoreError::Command(failure) => CoreError::Command(failure.into_user_error()),
        other => other,
    }
}

pub(super) async fn hg(
    ctx: &JobContext,
    url: &str,
    reference: Option<&str>,
    dest: &Path,
) -> CoreResult<()> {
    let mut spec = ProcessSpec::new("hg")
        .args(["--noninteractive", "clone"])
        .cwd(parent_of(dest)?)
        .describe("Could not clone Mercurial repository");
    if let Some(reference) = reference {
        spec = spec.args(["-u", reference]);
    }
    spec = spec.args([url.to_string(), path_arg(dest)]);
    process::run(ctx, spec).await.map_err(user_facing)?;
    Ok(())
}

pub(super) async fn svn(
    ctx: &JobContext,
    url: &str,
    reference: Option<&str>,
    dest: &Path,
) -> CoreResult<()> {
    let mut spec = ProcessSpec::new("svn")
        .args(["export", "--non-interactive", "-q"])
        .cwd(parent_of(dest)?)
        .describe("Could not export Subversion repository");
    if let Some(reference) = reference {
        spec = spec.args(["-r", reference]);
    }
    spec = spec.args([url.to_string(), path_arg(dest)]);
    process::run(ctx, spec).await.map_err(user_facing)?;
    Ok(())
}
