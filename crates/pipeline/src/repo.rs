//! Internal repository providers.
//!
//! The provider kind is chosen once at startup. `Local` keeps bare
//! repositories under a directory and creates them on first use;
//! `Template` only derives URLs and expects the repository to exist.

use std::path::PathBuf;

use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::types::{InternalRepo, RepoUrls};
use sourcepin_git::{Git, GitSettings};

/// Placeholder substituted with the repository name in URL templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Debug, Clone)]
pub enum RepoProvider {
    Local {
        root: PathBuf,
    },
    Template {
        readonly: String,
        readwrite: String,
    },
}

impl RepoProvider {
    /// Build a local provider. A relative `root` is resolved against the
    /// current directory once, here, since git runs in other directories.
    pub fn local(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = std::path::absolute(root.into())?;
        Ok(Self::Local { root })
    }

    /// Build a template provider, rejecting templates without `{name}`.
    pub fn template(readonly: impl Into<String>, readwrite: impl Into<String>) -> CoreResult<Self> {
        let (readonly, readwrite) = (readonly.into(), readwrite.into());
        for template in [&readonly, &readwrite] {
            if !template.contains(NAME_PLACEHOLDER) {
                return Err(CoreError::Config(format!(
                    "repository URL template '{template}' lacks {NAME_PLACEHOLDER}"
                )));
            }
        }
        Ok(Self::Template { readonly, readwrite })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RepoProvider::Local { .. } => "local",
            RepoProvider::Template { .. } => "template",
        }
    }

    /// Return the internal repository called `name`, creating it if this
    /// provider manages storage. Idempotent.
    pub async fn provision(
        &self,
        ctx: &JobContext,
        settings: &GitSettings,
        name: &str,
    ) -> CoreResult<InternalRepo> {
        match self {
            RepoProvider::Local { root } => {
                let root = std::path::absolute(root)?;
                let path = root.join(format!("{name}.git"));
                if !tokio::fs::try_exists(path.join("HEAD")).await? {
                    tokio::fs::create_dir_all(&root).await?;
                    ctx.log(format!("Creating internal repository {name}")).await;
                    Git::new(ctx, &root, settings).init_bare(&path).await?;
                }
                let location = path.to_string_lossy().into_owned();
                Ok(InternalRepo {
                    name: name.to_string(),
                    urls: RepoUrls {
                        readonly: format!("file://{location}"),
                        readwrite: location,
                    },
                })
            }
            RepoProvider::Template { readonly, readwrite } => Ok(InternalRepo {
                name: name.to_string(),
                urls: RepoUrls {
                    readonly: readonly.replace(NAME_PLACEHOLDER, name),
                    readwrite: readwrite.replace(NAME_PLACEHOLDER, name),
                },
            }),
        }
    }
}
