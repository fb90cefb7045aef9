use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque, unguessable job identifier.
///
/// Built from 122 random bits so ids cannot be enumerated by callers
/// trying to cancel or watch someone else's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier correlating server log records of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogContextId(String);

impl LogContextId {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().as_u128() as u64;
        Self(format!("{id:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the service is deployed.
///
/// Outside production every dedup tag gets a commit-id suffix so internal
/// and test mirrors of the same upstream never hand out each other's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Production,
    NonProduction,
}

impl DeploymentMode {
    pub fn is_production(self) -> bool {
        self == DeploymentMode::Production
    }
}

impl FromStr for DeploymentMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(DeploymentMode::Production),
            "nonproduction" | "non-production" | "devel" | "test" => {
                Ok(DeploymentMode::NonProduction)
            }
            other => Err(CoreError::Config(format!(
                "unknown deployment mode '{other}'"
            ))),
        }
    }
}

/// Readonly and readwrite URLs of an internal repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoUrls {
    pub readonly: String,
    pub readwrite: String,
}

/// An internal repository that results are committed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalRepo {
    pub name: String,
    pub urls: RepoUrls,
}
