use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::types::DeploymentMode;
use sourcepin_events::RetryPolicy;
use sourcepin_git::CommitIdentity;
use sourcepin_pipeline::{AdjustPipeline, RepoProvider};

/// Server configuration loaded from environment variables.
///
/// Built once at startup and shared as `Arc<ServerConfig>`. Provider kinds
/// are resolved here, so an unknown kind stops the server before it binds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `7331`).
    pub port: u16,
    /// Base of the live-log address handed to asynchronous callers.
    pub public_ws_url: String,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Synchronous jobs run inside it.
    pub request_timeout_secs: u64,
    pub deployment_mode: DeploymentMode,
    /// Parent of every scratch working tree.
    pub work_dir: PathBuf,
    /// Durable job logs.
    pub log_dir: PathBuf,
    pub log_retention: Duration,
    pub log_sweep_interval: Duration,
    /// How long shutdown waits for cancelled jobs to report.
    pub shutdown_grace: Duration,
    pub identity: CommitIdentity,
    pub repo_provider: RepoProvider,
    pub aligners: AdjustPipeline,
    pub callback_retry: RetryPolicy,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                  |
    /// |---------------------------------|--------------------------|
    /// | `HOST`                          | `0.0.0.0`                |
    /// | `PORT`                          | `7331`                   |
    /// | `PUBLIC_WS_URL`                 | `ws://localhost:7331`    |
    /// | `CORS_ORIGINS`                  | (any)                    |
    /// | `REQUEST_TIMEOUT_SECS`          | `3600`                   |
    /// | `DEPLOYMENT_MODE`               | `production`             |
    /// | `WORK_DIR`                      | `<tmp>/sourcepin`        |
    /// | `LOG_DIR`                       | `./job-logs`             |
    /// | `LOG_RETENTION_SECS`            | `86400`                  |
    /// | `LOG_SWEEP_INTERVAL_SECS`       | `600`                    |
    /// | `SHUTDOWN_GRACE_SECS`           | `60`                     |
    /// | `COMMIT_AUTHOR_NAME`            | `Sourcepin`              |
    /// | `COMMIT_AUTHOR_EMAIL`           | `sourcepin@localhost`    |
    /// | `REPO_PROVIDER`                 | `local`                  |
    /// | `REPO_LOCAL_ROOT`               | `./repos`                |
    /// | `REPO_READONLY_URL_TEMPLATE`    | required for `template`  |
    /// | `REPO_READWRITE_URL_TEMPLATE`   | required for `template`  |
    /// | `ADJUST_PROVIDERS`              | (none)                   |
    /// | `ADJUST_DEFAULT_BUILD_TYPE`     | (none)                   |
    /// | `ADJUST_USER_ERROR_EXIT_CODES`  | (none)                   |
    /// | `CALLBACK_MAX_ATTEMPTS`         | `9`                      |
    /// | `CALLBACK_INITIAL_DELAY_SECS`   | `2`                      |
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&var, "PORT", 7331)?;
        let public_ws_url = var("PUBLIC_WS_URL")
            .unwrap_or_else(|| format!("ws://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();
        let cors_origins = var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let request_timeout_secs = parse_or(&var, "REQUEST_TIMEOUT_SECS", 3600)?;
        let deployment_mode = parse_or(&var, "DEPLOYMENT_MODE", DeploymentMode::Production)?;

        let work_dir = var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("sourcepin"));
        let log_dir = var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./job-logs"));
        let log_retention = Duration::from_secs(parse_or(&var, "LOG_RETENTION_SECS", 86_400)?);
        let log_sweep_interval =
            Duration::from_secs(parse_or(&var, "LOG_SWEEP_INTERVAL_SECS", 600)?);
        if log_sweep_interval.is_zero() {
            return Err(CoreError::Config(
                "LOG_SWEEP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let shutdown_grace = Duration::from_secs(parse_or(&var, "SHUTDOWN_GRACE_SECS", 60)?);

        let defaults = CommitIdentity::default();
        let identity = CommitIdentity {
            name: var("COMMIT_AUTHOR_NAME").unwrap_or(defaults.name),
            email: var("COMMIT_AUTHOR_EMAIL").unwrap_or(defaults.email),
        };

        let repo_provider = repo_provider(&var)?;

        let user_error_exit_codes = var("ADJUST_USER_ERROR_EXIT_CODES")
            .map(|v| parse_exit_codes(&v))
            .transpose()?
            .unwrap_or_default();
        let aligners = AdjustPipeline::parse(
            &var("ADJUST_PROVIDERS").unwrap_or_default(),
            var("ADJUST_DEFAULT_BUILD_TYPE"),
            &user_error_exit_codes,
        )?;

        let retry_defaults = RetryPolicy::default();
        let callback_retry = RetryPolicy {
            max_attempts: parse_or(&var, "CALLBACK_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            initial_delay: Duration::from_secs(parse_or(
                &var,
                "CALLBACK_INITIAL_DELAY_SECS",
                retry_defaults.initial_delay.as_secs(),
            )?),
        };
        if callback_retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "CALLBACK_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            public_ws_url,
            cors_origins,
            request_timeout_secs,
            deployment_mode,
            work_dir,
            log_dir,
            log_retention,
            log_sweep_interval,
            shutdown_grace,
            identity,
            repo_provider,
            aligners,
            callback_retry,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> CoreResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Config(format!("{key}='{raw}' is invalid: {e}"))),
        None => Ok(default),
    }
}

fn repo_provider(var: &impl Fn(&str) -> Option<String>) -> CoreResult<RepoProvider> {
    let kind = var("REPO_PROVIDER").unwrap_or_else(|| "local".into());
    match kind.trim().to_ascii_lowercase().as_str() {
        "local" => RepoProvider::local(
            var("REPO_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./repos")),
        )
        .map_err(|e| CoreError::Config(format!("REPO_LOCAL_ROOT cannot be resolved: {e}"))),
        "template" => {
            let required = |key: &str| {
                var(key).ok_or_else(|| {
                    CoreError::Config(format!("{key} is required when REPO_PROVIDER=template"))
                })
            };
            RepoProvider::template(
                required("REPO_READONLY_URL_TEMPLATE")?,
                required("REPO_READWRITE_URL_TEMPLATE")?,
            )
        }
        other => Err(CoreError::Config(format!(
            "unknown repository provider '{other}'"
        ))),
    }
}

fn parse_exit_codes(raw: &str) -> CoreResult<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                CoreError::Config(format!("ADJUST_USER_ERROR_EXIT_CODES: '{s}' is not an exit code"))
            })
        })
        .collect()
}
