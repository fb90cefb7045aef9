use sourcepin_core::context::{JobContext, JobState};
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::request::AdjustRequest;
use sourcepin_core::result::ReferenceResult;
use sourcepin_git::{classify, commit_and_dedup, DedupOptions, Git};

use super::clone::sync_refs;
use super::{release, Pipeline};

impl Pipeline {
    /// Align an existing ref of an internal repository and commit the
    /// result on top of it.
    pub async fn adjust(&self, ctx: &JobContext, req: &AdjustRequest) -> CoreResult<ReferenceResult> {
        let git_settings = &self.settings.git;

        ctx.set_state(JobState::AcquiringSource);
        let repo = self.repos.provision(ctx, git_settings, &req.name).await?;
        let scratch = self.scratch("adjust").await?;

        if let (true, Some(origin)) = (req.sync, req.origin_repo_url.as_deref()) {
            ctx.log(format!("Syncing {} from {origin}", req.reference))
                .await;
            sync_refs(
                ctx,
                git_settings,
                &scratch.path().join("sync"),
                origin,
                &repo.urls.readwrite,
                Some(&req.reference),
            )
            .await?;
        }

        let dir = scratch.path().join("work");
        let dir_arg = dir.to_string_lossy().into_owned();
        Git::new(ctx, scratch.path(), git_settings)
            .run(
                ["clone", "-q", "--", repo.urls.readwrite.as_str(), dir_arg.as_str()],
                "Could not clone internal repository",
            )
            .await
            .map_err(classify::remap_user_error)?;

        let git = Git::new(ctx, &dir, git_settings);
        let mut commit = None;
        for candidate in [
            format!("refs/tags/{}", req.reference),
            format!("refs/remotes/origin/{}", req.reference),
            req.reference.clone(),
        ] {
            commit = git.resolve_commit(&candidate).await?;
            if commit.is_some() {
                break;
            }
        }
        let commit = commit.ok_or_else(|| CoreError::RefNotFound {
            reference: req.reference.clone(),
            repo: repo.name.clone(),
        })?;
        git.checkout(&commit).await?;

        ctx.set_state(JobState::Aligning);
        let adjust_result_data = self
            .aligners
            .run(
                ctx,
                req.build_type.as_deref(),
                &dir,
                req.adjust_parameters.as_ref(),
            )
            .await?;

        ctx.set_state(JobState::Committing);
        let n = self.sequence.next();
        let reference = commit_and_dedup(
            ctx,
            git_settings,
            &dir,
            &repo,
            "Adjust",
            &format!("Adjust of {} at {} ({commit})", req.name, req.reference),
            &DedupOptions::new(format!("adjust-{n}")).force_continue(),
        )
        .await?
        .ok_or_else(|| CoreError::Internal("adjust produced no reference".to_string()))?;
        release(ctx, scratch).await;

        Ok(ReferenceResult {
            reference,
            pull: None,
            adjust_result_data,
        })
    }
}
