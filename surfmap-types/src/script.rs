use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::asset::AssetKind;

/// A user-supplied Lua scanning script with metadata parsed from its
/// `-- @key value` header directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Stable identifier: the script's file name (e.g. `http_banner.lua`).
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Asset kinds this script can evaluate. Empty means all kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_types: Vec<AssetKind>,
    /// Scripts that must have returned `pass` before this one is eligible.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_passed: Vec<String>,
    pub content: String,
}

impl Script {
    /// Whether this script applies to the given asset kind.
    pub fn applies_to(&self, kind: AssetKind) -> bool {
        self.asset_types.is_empty() || self.asset_types.contains(&kind)
    }
}

/// A script's final judgement on an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Reject,
    Na,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Reject => write!(f, "reject"),
            Self::Na => write!(f, "na"),
        }
    }
}

/// The result of one script execution against one asset.
///
/// `metadata` is an open bag; the key `checklist_results` maps checklist
/// item ids to `{status, reason}` objects emitted by script code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub asset_id: String,
    pub script_name: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub decision: Decision,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ScanResult {
    /// The `checklist_results` metadata entry, if the script emitted any.
    pub fn checklist_results(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("checklist_results").and_then(Value::as_object)
    }
}
