use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use surfmap_types::{
    Asset, AssetFilter, AssetKind, ChecklistItemTemplate, Job, ScanResult, Script,
    SimpleChecklistStatus,
};

use crate::error::StoreError;

/// Counters over the store's collections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub asset_count: u64,
    pub job_count: u64,
    pub scan_result_count: u64,
    pub script_count: u64,
    pub checklist_template_count: u64,
}

/// The persistence contract for the engine.
///
/// The store exclusively owns persisted state and mediates its own
/// concurrency; callers must not assume read-after-write visibility beyond
/// what the implementation guarantees.
#[async_trait]
pub trait Store: Send + Sync {
    // Assets
    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError>;
    async fn get_asset(&self, id: &str) -> Result<Asset, StoreError>;
    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError>;
    async fn delete_asset(&self, id: &str) -> Result<(), StoreError>;
    async fn clear_all_assets(&self) -> Result<(), StoreError>;
    async fn list_assets(&self, filter: Option<&AssetFilter>) -> Result<Vec<Asset>, StoreError>;
    async fn get_assets_by_kind(&self, kind: AssetKind) -> Result<Vec<Asset>, StoreError>;

    // Jobs
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn get_job(&self, id: &str) -> Result<Job, StoreError>;
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
    async fn get_active_jobs(&self) -> Result<Vec<Job>, StoreError>;

    // Scan results (append-only; rescans purge per asset first)
    async fn create_scan_result(&self, result: &ScanResult) -> Result<(), StoreError>;
    async fn get_scan_result(&self, id: &str) -> Result<ScanResult, StoreError>;
    async fn get_scan_results_by_asset(&self, asset_id: &str)
        -> Result<Vec<ScanResult>, StoreError>;
    async fn get_scan_results_by_script(
        &self,
        script_name: &str,
    ) -> Result<Vec<ScanResult>, StoreError>;
    async fn list_scan_results(&self) -> Result<Vec<ScanResult>, StoreError>;
    async fn clear_scan_results_by_asset(&self, asset_id: &str) -> Result<(), StoreError>;

    // Scripts
    async fn create_script(&self, script: &Script) -> Result<(), StoreError>;
    async fn get_script(&self, name: &str) -> Result<Script, StoreError>;
    async fn update_script(&self, script: &Script) -> Result<(), StoreError>;
    async fn delete_script(&self, name: &str) -> Result<(), StoreError>;
    async fn list_scripts(&self) -> Result<Vec<Script>, StoreError>;

    // Checklist templates
    async fn create_checklist_template(
        &self,
        template: &ChecklistItemTemplate,
    ) -> Result<(), StoreError>;
    async fn get_checklist_template(&self, id: &str)
        -> Result<ChecklistItemTemplate, StoreError>;
    async fn update_checklist_template(
        &self,
        template: &ChecklistItemTemplate,
    ) -> Result<(), StoreError>;
    async fn delete_checklist_template(&self, id: &str) -> Result<(), StoreError>;
    async fn list_checklist_templates(&self) -> Result<Vec<ChecklistItemTemplate>, StoreError>;

    // Checklist statuses
    async fn set_checklist_status(
        &self,
        key: &str,
        status: &SimpleChecklistStatus,
    ) -> Result<(), StoreError>;
    async fn get_checklist_status(&self, key: &str)
        -> Result<SimpleChecklistStatus, StoreError>;
    async fn list_checklist_statuses(
        &self,
    ) -> Result<HashMap<String, SimpleChecklistStatus>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
