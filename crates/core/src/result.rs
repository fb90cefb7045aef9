//! Success results handed back to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RepoUrls;

/// A permanent reference into an internal repository.
///
/// For a fixed content tree and operation metadata, repeated dedup
/// attempts produce the same `tag` and `commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalReference {
    pub branch: String,
    pub tag: String,
    pub commit: String,
    pub url: RepoUrls,
}

/// Result of a pull or adjust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceResult {
    #[serde(flatten)]
    pub reference: InternalReference,
    /// The unaligned baseline when a pull also ran alignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<InternalReference>,
    /// Structured output accumulated by the alignment providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_result_data: Option<Value>,
}

impl From<InternalReference> for ReferenceResult {
    fn from(reference: InternalReference) -> Self {
        Self {
            reference,
            pull: None,
            adjust_result_data: None,
        }
    }
}

/// Result of mirroring an external repository into an internal one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneResult {
    #[serde(rename = "type")]
    pub clone_type: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Target repository URL the refs were pushed to.
    pub url: String,
}

/// Terminal success value of any job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Reference(ReferenceResult),
    Clone(CloneResult),
}
