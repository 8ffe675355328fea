use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use surfmap_store::Store;
use surfmap_types::{
    Asset, AssetCoverage, ChecklistItemTemplate, ChecklistScope, ChecklistStatus,
    DerivedChecklistItem, ScanResult, SimpleChecklistStatus, asset_key, global_key,
};
use tracing::{debug, warn};

use crate::error::CoreError;

/// A checklist verdict recovered from script-emitted scan metadata.
#[derive(Debug, Clone)]
struct ScriptVerdict {
    status: ChecklistStatus,
    reason: String,
    updated_at: DateTime<Utc>,
}

/// Joins checklist templates with manual statuses and script-emitted
/// verdicts into the canonical per-asset / global compliance view.
///
/// The derived view is a pure function of (templates, statuses, scan
/// results) at the time of the call; nothing here is persisted.
pub struct ChecklistService {
    store: Arc<dyn Store>,
}

impl ChecklistService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// All global-scope items with their current status, sorted by id.
    pub async fn global_checklist(&self) -> Result<Vec<DerivedChecklistItem>, CoreError> {
        let templates = self.store.list_checklist_templates().await?;
        let statuses = self.store.list_checklist_statuses().await?;

        let mut items = Vec::new();
        for template in templates {
            if template.scope != ChecklistScope::Global {
                continue;
            }
            let key = global_key(&template.id);
            let script_controlled = template.script_controlled;
            let mut item = derive_base(template, statuses.get(&key));
            if script_controlled {
                if let Some(verdict) = self.latest_global_verdict(&item.template.id).await? {
                    apply_verdict(&mut item, verdict);
                }
            }
            items.push(item);
        }

        items.sort_by(|a, b| a.template.id.cmp(&b.template.id));
        Ok(items)
    }

    /// All asset-scope items applicable to the given asset, sorted by id.
    pub async fn asset_checklist(
        &self,
        asset_id: &str,
    ) -> Result<Vec<DerivedChecklistItem>, CoreError> {
        let asset = self.store.get_asset(asset_id).await?;
        let templates = self.store.list_checklist_templates().await?;
        let statuses = self.store.list_checklist_statuses().await?;
        let results = self.store.get_scan_results_by_asset(asset_id).await?;

        let mut items = Vec::new();
        for template in templates {
            if template.scope != ChecklistScope::Asset || !template.applies_to(asset.kind) {
                continue;
            }
            let key = asset_key(asset_id, &template.id);
            let script_controlled = template.script_controlled;
            let mut item = derive_base(template, statuses.get(&key));
            if script_controlled {
                if let Some(verdict) = latest_verdict(&item.template.id, &results) {
                    apply_verdict(&mut item, verdict);
                }
            }
            items.push(item);
        }

        items.sort_by(|a, b| a.template.id.cmp(&b.template.id));

        for item in &mut items {
            item.covered_assets = self.covered_assets(&item.template, false).await?;
        }
        Ok(items)
    }

    /// Every template with its covered assets (concrete statuses only),
    /// sorted by id. Used for the organization-wide coverage view.
    pub async fn templates_with_coverage(
        &self,
        only_non_compliant: bool,
    ) -> Result<Vec<DerivedChecklistItem>, CoreError> {
        let templates = self.store.list_checklist_templates().await?;
        let mut items = Vec::new();
        for template in templates {
            let mut item = DerivedChecklistItem::from_template(template);
            item.covered_assets = self.covered_assets(&item.template, only_non_compliant).await?;
            items.push(item);
        }
        items.sort_by(|a, b| a.template.id.cmp(&b.template.id));
        Ok(items)
    }

    /// Record a manual status. `asset_id` of `None` targets the global key.
    pub async fn set_status(
        &self,
        item_id: &str,
        asset_id: Option<&str>,
        status: ChecklistStatus,
        notes: &str,
    ) -> Result<(), CoreError> {
        if item_id.is_empty() {
            return Err(CoreError::Validation("checklist item id is required".into()));
        }
        let key = match asset_id {
            Some(asset_id) => asset_key(asset_id, item_id),
            None => global_key(item_id),
        };
        let record = SimpleChecklistStatus {
            key: key.clone(),
            status,
            notes: notes.to_string(),
            updated_at: Utc::now(),
            attachments: Vec::new(),
        };
        self.store.set_checklist_status(&key, &record).await?;
        Ok(())
    }

    /// Replace the full template table. Returns the number installed.
    pub async fn upload_templates(
        &self,
        templates: Vec<ChecklistItemTemplate>,
    ) -> Result<usize, CoreError> {
        for existing in self.store.list_checklist_templates().await? {
            self.store.delete_checklist_template(&existing.id).await?;
        }
        let mut count = 0;
        for template in templates {
            self.store.create_checklist_template(&template).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Fold freshly-recorded scan results into stored statuses for
    /// script-controlled templates. Called after a scan completes.
    pub async fn process_scan_results(
        &self,
        asset_id: &str,
        results: &[ScanResult],
    ) -> Result<(), CoreError> {
        let templates = self.store.list_checklist_templates().await?;
        let controlled: HashMap<&str, &ChecklistItemTemplate> = templates
            .iter()
            .filter(|t| t.script_controlled)
            .map(|t| (t.id.as_str(), t))
            .collect();

        for result in results {
            let Some(verdicts) = result.checklist_results() else { continue };
            for (item_id, entry) in verdicts {
                let Some(status) = entry
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(ChecklistStatus::from_str_loose)
                else {
                    continue;
                };
                if !controlled.contains_key(item_id.as_str()) {
                    debug!(item_id, "ignoring verdict for non-script-controlled item");
                    continue;
                }
                let reason = entry.get("reason").and_then(Value::as_str).unwrap_or_default();
                if let Err(e) = self.set_status(item_id, Some(asset_id), status, reason).await {
                    warn!(item_id, asset_id, error = %e, "failed to record checklist verdict");
                }
            }
        }
        Ok(())
    }

    /// Compliance coverage counts by asset kind and by check.
    pub async fn coverage_summary(&self) -> Result<Value, CoreError> {
        let assets = self.store.list_assets(None).await?;
        let templates = self.store.list_checklist_templates().await?;
        let statuses = self.store.list_checklist_statuses().await?;

        let assets_by_id: HashMap<&str, &Asset> =
            assets.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut assets_with_data: std::collections::HashSet<String> = Default::default();
        let mut by_kind: HashMap<String, (u64, u64)> = HashMap::new();
        let mut by_check: HashMap<String, (u64, u64)> =
            templates.iter().map(|t| (t.id.clone(), (0, 0))).collect();

        for (key, status) in &statuses {
            if !status.status.is_concrete() {
                continue;
            }
            let Some(rest) = key.strip_prefix("asset:") else { continue };
            let Some((asset_id, check_id)) = rest.split_once(':') else { continue };
            let Some(asset) = assets_by_id.get(asset_id) else { continue };

            assets_with_data.insert(asset_id.to_string());
            let kind_entry = by_kind.entry(asset.kind.to_string()).or_default();
            let check_entry = by_check.entry(check_id.to_string()).or_default();
            if status.status == ChecklistStatus::Yes {
                kind_entry.0 += 1;
                check_entry.0 += 1;
            } else {
                kind_entry.1 += 1;
                check_entry.1 += 1;
            }
        }

        Ok(json!({
            "total_assets": assets.len(),
            "total_compliance_checks": templates.len(),
            "assets_with_compliance_data": assets_with_data.len(),
            "coverage_by_asset_type": by_kind
                .into_iter()
                .map(|(kind, (yes, no))| {
                    (kind, json!({"yes_count": yes, "no_count": no, "total_checks": yes + no}))
                })
                .collect::<serde_json::Map<_, _>>(),
            "coverage_by_check": by_check
                .into_iter()
                .map(|(id, (yes, no))| {
                    (id, json!({"yes_count": yes, "no_count": no, "total_applicable": yes + no}))
                })
                .collect::<serde_json::Map<_, _>>(),
        }))
    }

    /// Assets carrying a concrete status for the template: `yes`/`no` when
    /// `only_non_compliant` is false, `no` alone when true. Manual statuses
    /// win; script verdicts fill in where no manual status exists.
    async fn covered_assets(
        &self,
        template: &ChecklistItemTemplate,
        only_non_compliant: bool,
    ) -> Result<Vec<AssetCoverage>, CoreError> {
        let assets = self.store.list_assets(None).await?;
        let statuses = self.store.list_checklist_statuses().await?;

        let include = |status: ChecklistStatus| {
            if only_non_compliant {
                status == ChecklistStatus::No
            } else {
                status.is_concrete()
            }
        };

        let mut covered = Vec::new();
        for asset in &assets {
            if template.scope == ChecklistScope::Asset && !template.applies_to(asset.kind) {
                continue;
            }
            let key = asset_key(&asset.id, &template.id);
            if let Some(status) = statuses.get(&key) {
                if include(status.status) {
                    covered.push(AssetCoverage {
                        asset_id: asset.id.clone(),
                        asset_type: asset.kind,
                        asset_value: asset.value.clone(),
                        status: status.status,
                        notes: status.notes.clone(),
                        updated_at: Some(status.updated_at),
                    });
                }
            } else if template.scope == ChecklistScope::Asset && template.script_controlled {
                let results = self.store.get_scan_results_by_asset(&asset.id).await?;
                if let Some(verdict) = latest_verdict(&template.id, &results) {
                    if include(verdict.status) {
                        covered.push(AssetCoverage {
                            asset_id: asset.id.clone(),
                            asset_type: asset.kind,
                            asset_value: asset.value.clone(),
                            status: verdict.status,
                            notes: verdict.reason,
                            updated_at: Some(verdict.updated_at),
                        });
                    }
                }
            }
        }

        covered.sort_by(|a, b| {
            a.asset_type
                .to_string()
                .cmp(&b.asset_type.to_string())
                .then_with(|| a.asset_value.cmp(&b.asset_value))
        });
        Ok(covered)
    }

    /// Most recent script verdict for a global item, across all assets.
    async fn latest_global_verdict(
        &self,
        item_id: &str,
    ) -> Result<Option<ScriptVerdict>, CoreError> {
        let results = self.store.list_scan_results().await?;
        Ok(latest_verdict(item_id, &results))
    }
}

/// Template + optional manual status, without script overrides.
fn derive_base(
    template: ChecklistItemTemplate,
    manual: Option<&SimpleChecklistStatus>,
) -> DerivedChecklistItem {
    let mut item = DerivedChecklistItem::from_template(template);
    if let Some(status) = manual {
        item.status = status.status;
        item.notes = status.notes.clone();
        item.updated_at = Some(status.updated_at);
        item.attachments = status.attachments.clone();
    }
    item
}

fn apply_verdict(item: &mut DerivedChecklistItem, verdict: ScriptVerdict) {
    item.status = verdict.status;
    if !verdict.reason.is_empty() {
        item.notes = verdict.reason;
    }
    item.updated_at = Some(verdict.updated_at);
}

/// The most recent checklist verdict for an item across the given results.
fn latest_verdict(item_id: &str, results: &[ScanResult]) -> Option<ScriptVerdict> {
    let mut latest: Option<ScriptVerdict> = None;
    for result in results {
        let Some(verdicts) = result.checklist_results() else { continue };
        let Some(entry) = verdicts.get(item_id) else { continue };
        let Some(status) = entry
            .get("status")
            .and_then(Value::as_str)
            .and_then(ChecklistStatus::from_str_loose)
        else {
            continue;
        };
        if latest.as_ref().is_some_and(|l| l.updated_at >= result.executed_at) {
            continue;
        }
        latest = Some(ScriptVerdict {
            status,
            reason: entry.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
            updated_at: result.executed_at,
        });
    }
    latest
}
