//! Alignment provider pipeline.
//!
//! Each build type maps to an ordered list of providers. They run one
//! after another in the same working tree and their JSON results are
//! merged into a single object, later keys overriding earlier ones.

mod command;

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};
use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};

pub use command::CommandProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustProvider {
    Command(CommandProvider),
    /// Leaves the tree untouched.
    Noop,
}

impl AdjustProvider {
    fn describe(&self) -> String {
        match self {
            AdjustProvider::Command(c) => c.describe(),
            AdjustProvider::Noop => "noop".to_string(),
        }
    }

    async fn run(
        &self,
        ctx: &JobContext,
        work_tree: &Path,
        params: &Value,
    ) -> CoreResult<Option<Value>> {
        match self {
            AdjustProvider::Command(c) => c.run(ctx, work_tree, params).await,
            AdjustProvider::Noop => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdjustPipeline {
    providers: BTreeMap<String, Vec<AdjustProvider>>,
    default_build_type: Option<String>,
}

impl AdjustPipeline {
    pub fn new(default_build_type: Option<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_build_type,
        }
    }

    pub fn with_provider(mut self, build_type: impl Into<String>, provider: AdjustProvider) -> Self {
        self.providers
            .entry(build_type.into())
            .or_default()
            .push(provider);
        self
    }

    /// Parse `buildType=program arg...;buildType=...`. A build type may
    /// repeat to chain providers; an empty command is a no-op provider.
    pub fn parse(
        spec: &str,
        default_build_type: Option<String>,
        user_error_exit_codes: &[i32],
    ) -> CoreResult<Self> {
        let mut pipeline = Self::new(default_build_type);
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (build_type, command) = entry.split_once('=').ok_or_else(|| {
                CoreError::Config(format!("alignment provider '{entry}' is not buildType=command"))
            })?;
            let build_type = build_type.trim();
            if build_type.is_empty() {
                return Err(CoreError::Config(format!(
                    "alignment provider '{entry}' has an empty build type"
                )));
            }
            let provider = match CommandProvider::parse(command) {
                Some(c) => AdjustProvider::Command(
                    c.with_user_error_exit_codes(user_error_exit_codes.to_vec()),
                ),
                None => AdjustProvider::Noop,
            };
            pipeline = pipeline.with_provider(build_type, provider);
        }

        if let Some(default) = &pipeline.default_build_type {
            if !pipeline.providers.contains_key(default) {
                return Err(CoreError::Config(format!(
                    "default build type '{default}' has no alignment provider"
                )));
            }
        }
        Ok(pipeline)
    }

    pub fn build_types(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Providers for `build_type`, falling back to the configured default,
    /// or to the only configured build type.
    fn resolve(&self, build_type: Option<&str>) -> CoreResult<(&str, &[AdjustProvider])> {
        let key = match build_type.or(self.default_build_type.as_deref()) {
            Some(key) => key,
            None if self.providers.len() == 1 => self
                .providers
                .keys()
                .next()
                .map(String::as_str)
                .unwrap_or_default(),
            None => {
                return Err(CoreError::Validation(
                    "buildType is required: no default alignment build type is configured"
                        .to_string(),
                ))
            }
        };
        self.providers
            .get_key_value(key)
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .ok_or_else(|| {
                CoreError::Validation(format!("no alignment provider for build type '{key}'"))
            })
    }

    /// Run every provider of the build type in order and merge results.
    ///
    /// Returns `None` if no provider produced a result. Checks for
    /// cancellation after the last provider so a cancelled job never
    /// reaches the commit stage.
    pub async fn run(
        &self,
        ctx: &JobContext,
        build_type: Option<&str>,
        work_tree: &Path,
        params: Option<&Value>,
    ) -> CoreResult<Option<Value>> {
        let (build_type, providers) = self.resolve(build_type)?;
        let empty = Value::Object(Map::new());
        let params = params.unwrap_or(&empty);

        let mut merged = Map::new();
        let mut any = false;
        for provider in providers {
            ctx.ensure_active()?;
            ctx.log(format!(
                "Aligning for build type {build_type} with {}",
                provider.describe()
            ))
            .await;
            if let Some(Value::Object(result)) = provider.run(ctx, work_tree, params).await? {
                merged.extend(result);
                any = true;
            }
        }
        ctx.ensure_active()?;

        Ok(any.then_some(Value::Object(merged)))
    }
}
