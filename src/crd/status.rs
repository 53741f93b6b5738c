//! Status shared by every fragment kind

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bookkeeping the operator persists on each fragment after a successful merge
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FragmentStatus {
    /// SHA-256 of the spec last folded into the composite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<String>,

    /// RFC3339 time of the last status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
}

impl FragmentStatus {
    pub fn fingerprint(&self) -> Option<&str> {
        self.content_fingerprint
            .as_deref()
            .filter(|fingerprint| !fingerprint.is_empty())
    }
}
