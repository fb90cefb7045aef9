use std::sync::Arc;

use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_events::{CallbackDelivery, LogHub};
use sourcepin_git::{GitSettings, GitVersion};
use sourcepin_pipeline::{Pipeline, PipelineSettings};

use crate::config::ServerConfig;
use crate::engine::JobEngine;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or is itself a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job submission and cancellation.
    pub engine: JobEngine,
    /// Durable job logs and their live subscribers.
    pub logs: Arc<LogHub>,
    /// Open live-log connections.
    pub ws_manager: Arc<WsManager>,
}

impl AppState {
    /// Wire up the services described by `config`.
    ///
    /// `git_version` is the detected client version; it decides whether
    /// pushes are attempted atomically.
    pub async fn build(config: ServerConfig, git_version: GitVersion) -> CoreResult<Self> {
        let logs = Arc::new(LogHub::create(&config.log_dir, config.log_retention).await?);

        let settings = PipelineSettings {
            work_dir: config.work_dir.clone(),
            git: GitSettings::new(config.identity.clone(), git_version, config.deployment_mode),
        };
        let pipeline = Pipeline::new(settings, config.repo_provider.clone(), config.aligners.clone())?;

        let delivery = CallbackDelivery::new(config.callback_retry)
            .map_err(|e| CoreError::Config(format!("could not build callback client: {e}")))?;

        let engine = JobEngine::new(
            Arc::new(pipeline),
            Arc::clone(&logs),
            Arc::new(delivery),
            config.public_ws_url.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            logs,
            ws_manager: Arc::new(WsManager::new()),
        })
    }
}
