use sourcepin_core::context::{JobContext, JobState};
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::request::PullRequest;
use sourcepin_core::result::{InternalReference, ReferenceResult};
use sourcepin_git::{commit_and_dedup, DedupOptions, Git};

use super::{release, Pipeline};
use crate::acquire::{self, SourceSpec};
use crate::fsutil;

impl Pipeline {
    /// Import an external source as a fresh orphan lineage.
    ///
    /// With alignment, the acquired tree is copied and aligned before
    /// anything is committed, so a failed or cancelled alignment leaves
    /// the internal repository untouched. The raw tree is then committed
    /// as `pull-<n>` / `pull-<n>-root` and the aligned tree as its child
    /// `adjust-<n>` / `adjust-<n>-root`. If alignment changed nothing, the
    /// pull reference is returned on its own.
    pub async fn pull(&self, ctx: &JobContext, req: &PullRequest) -> CoreResult<ReferenceResult> {
        let git_settings = &self.settings.git;

        ctx.set_state(JobState::AcquiringSource);
        let repo = self.repos.provision(ctx, git_settings, &req.name).await?;
        let scratch = self.scratch("pull").await?;
        let raw = scratch.path().join("source");
        acquire::acquire(
            ctx,
            git_settings,
            &self.http,
            SourceSpec {
                source_type: req.source_type,
                url: &req.url,
                reference: req.reference.as_deref(),
            },
            &raw,
        )
        .await?;

        let aligned = if req.adjust {
            ctx.set_state(JobState::Aligning);
            let dir = scratch.path().join("aligned");
            fsutil::copy_tree(&raw, &dir).await?;
            let data = self
                .aligners
                .run(ctx, None, &dir, req.adjust_parameters.as_ref())
                .await?;
            Some((dir, data))
        } else {
            None
        };

        ctx.set_state(JobState::Committing);
        let n = self.sequence.next();
        Git::new(ctx, &raw, git_settings).init().await?;
        let pull_ref = commit_and_dedup(
            ctx,
            git_settings,
            &raw,
            &repo,
            "Pull",
            &pull_description(req),
            &DedupOptions::new(format!("pull-{n}"))
                .no_change_ok()
                .with_tag(format!("pull-{n}-root")),
        )
        .await?
        .ok_or_else(|| CoreError::Internal("pull produced no reference".to_string()))?;

        let Some((aligned_dir, adjust_result_data)) = aligned else {
            release(ctx, scratch).await;
            return Ok(pull_ref.into());
        };

        // The aligned tree becomes a child of the pull commit.
        tokio::fs::rename(raw.join(".git"), aligned_dir.join(".git")).await?;
        let adjust_ref = commit_and_dedup(
            ctx,
            git_settings,
            &aligned_dir,
            &repo,
            "Adjust",
            &format!("Adjust of {} ({})", pull_ref.tag, pull_ref.commit),
            &DedupOptions::new(format!("adjust-{n}"))
                .no_change_ok()
                .with_tag(format!("adjust-{n}-root")),
        )
        .await?;
        release(ctx, scratch).await;

        Ok(assemble(ctx, pull_ref, adjust_ref, adjust_result_data).await)
    }
}

fn pull_description(req: &PullRequest) -> String {
    match &req.reference {
        Some(reference) => format!(
            "Pull of {} from {} {} at {reference}",
            req.name,
            req.source_type.as_str(),
            req.url
        ),
        None => format!(
            "Pull of {} from {} {}",
            req.name,
            req.source_type.as_str(),
            req.url
        ),
    }
}

async fn assemble(
    ctx: &JobContext,
    pull_ref: InternalReference,
    adjust_ref: Option<InternalReference>,
    adjust_result_data: Option<serde_json::Value>,
) -> ReferenceResult {
    match adjust_ref {
        Some(adjust_ref) if adjust_ref.commit != pull_ref.commit => ReferenceResult {
            reference: adjust_ref,
            pull: Some(pull_ref),
            adjust_result_data,
        },
        _ => {
            ctx.log("Alignment made no changes, returning the pull result")
                .await;
            ReferenceResult {
                reference: pull_ref,
                pull: None,
                adjust_result_data,
            }
        }
    }
}
