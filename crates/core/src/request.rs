//! Inbound request bodies for the pull, clone and adjust operations.
//!
//! Field-level rules are declared with `validator`; rules that span
//! several fields live in each request's `check()` method, which is the
//! single entry point handlers call before a job is created.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::{CoreError, CoreResult};

/// Kind of external location a pull reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Hg,
    Svn,
    Archive,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Git => "git",
            SourceType::Hg => "hg",
            SourceType::Svn => "svn",
            SourceType::Archive => "archive",
        }
    }
}

/// Only git origins can be mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneType {
    Git,
}

/// HTTP method used to deliver a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallbackMethod {
    #[default]
    Post,
    Put,
}

/// Where and how to notify the caller once an asynchronous job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CallbackSpec {
    #[validate(url(message = "callback url must be an absolute URL"))]
    pub url: String,
    #[serde(default)]
    pub method: CallbackMethod,
    /// Sent verbatim as the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[validate(length(min = 1, max = 255, message = "name must not be empty"))]
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[validate(length(min = 1, message = "url must not be empty"))]
    pub url: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub adjust: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_parameters: Option<Value>,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackSpec>,
}

impl PullRequest {
    pub fn check(&self) -> CoreResult<()> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        check_repo_name(&self.name)?;
        check_parameters(self.adjust_parameters.as_ref())?;
        if let Some(reference) = &self.reference {
            check_ref(reference)?;
        }
        match self.source_type {
            SourceType::Archive if self.reference.is_some() => Err(CoreError::Validation(
                "ref is not supported for archive sources".to_string(),
            )),
            SourceType::Archive => Ok(()),
            SourceType::Git | SourceType::Hg | SourceType::Svn => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    #[serde(rename = "type")]
    pub clone_type: CloneType,
    #[validate(length(min = 1, message = "originRepoUrl must not be empty"))]
    pub origin_repo_url: String,
    #[validate(length(min = 1, message = "targetRepoUrl must not be empty"))]
    pub target_repo_url: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackSpec>,
}

impl CloneRequest {
    pub fn check(&self) -> CoreResult<()> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        if let Some(reference) = &self.reference {
            check_ref(reference)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    #[validate(length(min = 1, max = 255, message = "name must not be empty"))]
    pub name: String,
    #[serde(rename = "ref")]
    #[validate(length(min = 1, message = "ref must not be empty"))]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_repo_url: Option<String>,
    #[serde(default)]
    pub sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_parameters: Option<Value>,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackSpec>,
}

impl AdjustRequest {
    pub fn check(&self) -> CoreResult<()> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        check_repo_name(&self.name)?;
        check_ref(&self.reference)?;
        check_parameters(self.adjust_parameters.as_ref())?;
        if self.sync && self.origin_repo_url.is_none() {
            return Err(CoreError::Validation(
                "sync requires originRepoUrl".to_string(),
            ));
        }
        Ok(())
    }
}

/// A validated request of any operation kind.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Pull(PullRequest),
    Clone(CloneRequest),
    Adjust(AdjustRequest),
}

impl JobRequest {
    pub fn callback(&self) -> Option<&CallbackSpec> {
        match self {
            JobRequest::Pull(r) => r.callback.as_ref(),
            JobRequest::Clone(r) => r.callback.as_ref(),
            JobRequest::Adjust(r) => r.callback.as_ref(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            JobRequest::Pull(_) => "pull",
            JobRequest::Clone(_) => "clone",
            JobRequest::Adjust(_) => "adjust",
        }
    }

    pub fn check(&self) -> CoreResult<()> {
        match self {
            JobRequest::Pull(r) => r.check(),
            JobRequest::Clone(r) => r.check(),
            JobRequest::Adjust(r) => r.check(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field checks
// ---------------------------------------------------------------------------

static REPO_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9][A-Za-z0-9._-]*)*$")
        .unwrap_or_else(|e| unreachable!("repo name pattern is valid: {e}"))
});

/// Internal repository names become path segments and URL components.
fn check_repo_name(name: &str) -> CoreResult<()> {
    if !REPO_NAME.is_match(name) || name.contains("..") || name.ends_with(".git") {
        return Err(CoreError::Validation(format!(
            "name '{name}' must be a relative path of [A-Za-z0-9._-] segments"
        )));
    }
    Ok(())
}

/// Refs end up on git command lines.
fn check_ref(reference: &str) -> CoreResult<()> {
    if reference.is_empty()
        || reference.starts_with('-')
        || reference.contains("..")
        || reference.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CoreError::Validation(format!(
            "ref '{reference}' is not a valid git ref"
        )));
    }
    Ok(())
}

fn check_parameters(parameters: Option<&Value>) -> CoreResult<()> {
    match parameters {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(CoreError::Validation(
            "adjustParameters must be a JSON object".to_string(),
        )),
    }
}
