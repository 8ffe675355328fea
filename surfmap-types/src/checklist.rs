use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::asset::AssetKind;

/// Scope of a checklist item: organization-wide or per-asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistScope {
    Global,
    Asset,
}

/// Compliance status of a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistStatus {
    Yes,
    No,
    Na,
}

impl fmt::Display for ChecklistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Na => write!(f, "na"),
        }
    }
}

impl ChecklistStatus {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "na" => Some(Self::Na),
            _ => None,
        }
    }

    /// Concrete statuses count toward coverage; `na` does not.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Yes | Self::No)
    }
}

/// Where a derived status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistSource {
    Auto,
    Manual,
}

/// Operator of an evidence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceOp {
    Exists,
    Eq,
    Regex,
    GteDaysSince,
}

/// A rule to derive checklist status from scan metadata. Recognized in the
/// data model; evaluation is an extension point and not performed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRule {
    /// Currently always `scan_metadata`.
    pub source: String,
    pub key: String,
    pub op: EvidenceOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Template for a compliance control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItemTemplate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub scope: ChecklistScope,
    /// Applicable asset kinds when scope is `asset`; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_types: Vec<AssetKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_rules: Vec<EvidenceRule>,
    /// Whether Lua scripts may drive this item via `*_checklist` verdicts.
    #[serde(default)]
    pub script_controlled: bool,
}

impl ChecklistItemTemplate {
    /// An asset-scoped template applies to an asset iff `asset_types` is
    /// empty or contains the asset's kind.
    pub fn applies_to(&self, kind: AssetKind) -> bool {
        self.asset_types.is_empty() || self.asset_types.contains(&kind)
    }

    /// Automated items are those a machine can drive.
    pub fn is_automated(&self) -> bool {
        self.script_controlled || !self.evidence_rules.is_empty()
    }
}

/// Stored status keyed by `global:{item_id}` or `asset:{asset_id}:{item_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleChecklistStatus {
    pub key: String,
    pub status: ChecklistStatus,
    #[serde(default)]
    pub notes: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// An asset carrying a concrete (`yes`/`no`) status for a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCoverage {
    pub asset_id: String,
    pub asset_type: AssetKind,
    pub asset_value: String,
    pub status: ChecklistStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A checklist template joined with its current status. Computed on the
/// fly, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedChecklistItem {
    #[serde(flatten)]
    pub template: ChecklistItemTemplate,
    pub status: ChecklistStatus,
    pub source: ChecklistSource,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub covered_assets: Vec<AssetCoverage>,
}

impl DerivedChecklistItem {
    /// The default view of a template: `na`, manual, nothing recorded.
    pub fn from_template(template: ChecklistItemTemplate) -> Self {
        let source = if template.is_automated() {
            ChecklistSource::Auto
        } else {
            ChecklistSource::Manual
        };
        Self {
            template,
            status: ChecklistStatus::Na,
            source,
            notes: String::new(),
            updated_at: None,
            attachments: Vec::new(),
            covered_assets: Vec::new(),
        }
    }
}
