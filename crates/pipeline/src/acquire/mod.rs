//! Source acquisition: materialise an external source as a plain directory.
//!
//! Every acquirer leaves `dest` holding only the source files. VCS metadata
//! is stripped so the tree can root a fresh lineage in the internal
//! repository.

mod archive;
mod vcs;

use std::path::Path;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::CoreResult;
use sourcepin_core::request::SourceType;
use sourcepin_git::GitSettings;

use crate::fsutil;

/// Where a pull reads its source from.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec<'a> {
    pub source_type: SourceType,
    pub url: &'a str,
    pub reference: Option<&'a str>,
}

/// Acquire `source` into `dest`, which must not exist yet.
pub async fn acquire(
    ctx: &JobContext,
    settings: &GitSettings,
    http: &reqwest::Client,
    source: SourceSpec<'_>,
    dest: &Path,
) -> CoreResult<()> {
    ctx.log(format!(
        "Acquiring {} source from {}{}",
        source.source_type.as_str(),
        source.url,
        source
            .reference
            .map(|r| format!(" at {r}"))
            .unwrap_or_default()
    ))
    .await;

    match source.source_type {
        SourceType::Git => vcs::git(ctx, settings, source.url, source.reference, dest).await?,
        SourceType::Hg => vcs::hg(ctx, source.url, source.reference, dest).await?,
        SourceType::Svn => vcs::svn(ctx, source.url, source.reference, dest).await?,
        SourceType::Archive => archive::fetch(ctx, http, source.url, dest).await?,
    }

    let removed = fsutil::strip_vcs_metadata(dest).await?;
    tracing::debug!(job_id = %ctx.job_id(), removed, "Stripped VCS metadata");
    Ok(())
}
