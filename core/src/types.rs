//! Wire types shared by every resource.
//!
//! # Design
//! These mirror the appliance's JSON envelopes but are defined independently
//! of the mock appliance; the integration tests catch any schema drift
//! between the two crates. Resource bodies themselves stay generic (`T`) so
//! callers bring their own DTOs.

use serde::{Deserialize, Serialize};

/// Paginated list returned by `get_all` and name lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCollection<T> {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub start: u32,
    #[serde(default = "Vec::new")]
    pub members: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_page_uri: Option<String>,
}

impl<T> ResourceCollection<T> {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the appliance holds more members than this page.
    pub fn has_more(&self) -> bool {
        self.next_page_uri.is_some()
    }
}

/// One JSON-patch style operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Patch {
    pub fn replace(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Response of `GET /rest/version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceVersion {
    pub current_version: u32,
    pub minimum_version: u32,
}
