use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use surfmap_types::{
    Asset, AssetFilter, AssetKind, ChecklistItemTemplate, Job, JobStatus, ScanResult, Script,
    SimpleChecklistStatus,
};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{Store, StoreStats};

const ASSETS_FILE: &str = "assets.json";
const JOBS_FILE: &str = "jobs.json";
const SCAN_RESULTS_FILE: &str = "scan_results.json";
const SCRIPTS_FILE: &str = "scripts.json";
const TEMPLATES_FILE: &str = "checklist_templates.json";
const STATUSES_FILE: &str = "checklist_statuses.json";

#[derive(Default)]
struct State {
    assets: HashMap<String, Asset>,
    jobs: HashMap<String, Job>,
    scan_results: Vec<ScanResult>,
    scripts: HashMap<String, Script>,
    templates: HashMap<String, ChecklistItemTemplate>,
    statuses: HashMap<String, SimpleChecklistStatus>,
}

/// JSON-file reference store.
///
/// One mutex serializes every operation; each mutation rewrites the touched
/// collection's file. Fine for the asset volumes this system sees, and it
/// keeps the consistency story trivial.
pub struct JsonStore {
    state: Mutex<State>,
    data_dir: Option<PathBuf>,
}

impl JsonStore {
    /// Open (or create) a store persisted under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let state = State {
            assets: load_map(&dir.join(ASSETS_FILE))?,
            jobs: load_map(&dir.join(JOBS_FILE))?,
            scan_results: load_vec(&dir.join(SCAN_RESULTS_FILE))?,
            scripts: load_map(&dir.join(SCRIPTS_FILE))?,
            templates: load_map(&dir.join(TEMPLATES_FILE))?,
            statuses: load_map(&dir.join(STATUSES_FILE))?,
        };
        debug!(dir = %dir.display(), assets = state.assets.len(), "json store opened");

        Ok(Self { state: Mutex::new(state), data_dir: Some(dir) })
    }

    /// In-memory store (for testing); nothing is written to disk.
    pub fn open_in_memory() -> Self {
        Self { state: Mutex::new(State::default()), data_dir: None }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned store mutex means a panic mid-mutation; recover the
        // data rather than refusing all further operations.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist<T: Serialize>(&self, file: &str, value: &T) {
        let Some(ref dir) = self.data_dir else { return };
        let path = dir.join(file);
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(path = %path.display(), error = %e, "failed to persist collection");
                }
            }
            Err(e) => warn!(file, error = %e, "failed to serialize collection"),
        }
    }
}

fn load_map<T: DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn load_vec<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl Store for JsonStore {
    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.assets.contains_key(&asset.id) {
            return Err(StoreError::Conflict(format!("asset {} already exists", asset.id)));
        }
        state.assets.insert(asset.id.clone(), asset.clone());
        self.persist(ASSETS_FILE, &state.assets);
        Ok(())
    }

    async fn get_asset(&self, id: &str) -> Result<Asset, StoreError> {
        self.locked()
            .assets
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("asset {id}")))
    }

    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut state = self.locked();
        if !state.assets.contains_key(&asset.id) {
            return Err(StoreError::NotFound(format!("asset {}", asset.id)));
        }
        state.assets.insert(asset.id.clone(), asset.clone());
        self.persist(ASSETS_FILE, &state.assets);
        Ok(())
    }

    async fn delete_asset(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.assets.remove(id).is_none() {
            return Err(StoreError::NotFound(format!("asset {id}")));
        }
        self.persist(ASSETS_FILE, &state.assets);
        Ok(())
    }

    async fn clear_all_assets(&self) -> Result<(), StoreError> {
        let mut state = self.locked();
        state.assets.clear();
        state.scan_results.clear();
        self.persist(ASSETS_FILE, &state.assets);
        self.persist(SCAN_RESULTS_FILE, &state.scan_results);
        Ok(())
    }

    async fn list_assets(&self, filter: Option<&AssetFilter>) -> Result<Vec<Asset>, StoreError> {
        let state = self.locked();
        let mut assets: Vec<Asset> = state
            .assets
            .values()
            .filter(|asset| filter.map_or(true, |f| f.matches(asset)))
            .cloned()
            .collect();
        assets.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at).then(a.id.cmp(&b.id)));
        Ok(assets)
    }

    async fn get_assets_by_kind(&self, kind: AssetKind) -> Result<Vec<Asset>, StoreError> {
        let filter = AssetFilter { kinds: vec![kind], ..Default::default() };
        self.list_assets(Some(&filter)).await
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        self.persist(JOBS_FILE, &state.jobs);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.locked()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.locked();
        if !state.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(format!("job {}", job.id)));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        self.persist(JOBS_FILE, &state.jobs);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.locked();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    async fn get_active_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.list_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| matches!(job.status, JobStatus::Pending | JobStatus::Running))
            .collect())
    }

    async fn create_scan_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let mut state = self.locked();
        state.scan_results.push(result.clone());
        self.persist(SCAN_RESULTS_FILE, &state.scan_results);
        Ok(())
    }

    async fn get_scan_result(&self, id: &str) -> Result<ScanResult, StoreError> {
        self.locked()
            .scan_results
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("scan result {id}")))
    }

    async fn get_scan_results_by_asset(
        &self,
        asset_id: &str,
    ) -> Result<Vec<ScanResult>, StoreError> {
        Ok(self
            .locked()
            .scan_results
            .iter()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn get_scan_results_by_script(
        &self,
        script_name: &str,
    ) -> Result<Vec<ScanResult>, StoreError> {
        Ok(self
            .locked()
            .scan_results
            .iter()
            .filter(|r| r.script_name == script_name)
            .cloned()
            .collect())
    }

    async fn list_scan_results(&self) -> Result<Vec<ScanResult>, StoreError> {
        Ok(self.locked().scan_results.clone())
    }

    async fn clear_scan_results_by_asset(&self, asset_id: &str) -> Result<(), StoreError> {
        let mut state = self.locked();
        state.scan_results.retain(|r| r.asset_id != asset_id);
        self.persist(SCAN_RESULTS_FILE, &state.scan_results);
        Ok(())
    }

    async fn create_script(&self, script: &Script) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.scripts.contains_key(&script.name) {
            return Err(StoreError::Conflict(format!("script {} already exists", script.name)));
        }
        state.scripts.insert(script.name.clone(), script.clone());
        self.persist(SCRIPTS_FILE, &state.scripts);
        Ok(())
    }

    async fn get_script(&self, name: &str) -> Result<Script, StoreError> {
        self.locked()
            .scripts
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("script {name}")))
    }

    async fn update_script(&self, script: &Script) -> Result<(), StoreError> {
        let mut state = self.locked();
        state.scripts.insert(script.name.clone(), script.clone());
        self.persist(SCRIPTS_FILE, &state.scripts);
        Ok(())
    }

    async fn delete_script(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.scripts.remove(name).is_none() {
            return Err(StoreError::NotFound(format!("script {name}")));
        }
        self.persist(SCRIPTS_FILE, &state.scripts);
        Ok(())
    }

    async fn list_scripts(&self) -> Result<Vec<Script>, StoreError> {
        let state = self.locked();
        let mut scripts: Vec<Script> = state.scripts.values().cloned().collect();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    async fn create_checklist_template(
        &self,
        template: &ChecklistItemTemplate,
    ) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.templates.contains_key(&template.id) {
            return Err(StoreError::Conflict(format!(
                "checklist template {} already exists",
                template.id
            )));
        }
        state.templates.insert(template.id.clone(), template.clone());
        self.persist(TEMPLATES_FILE, &state.templates);
        Ok(())
    }

    async fn get_checklist_template(
        &self,
        id: &str,
    ) -> Result<ChecklistItemTemplate, StoreError> {
        self.locked()
            .templates
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("checklist template {id}")))
    }

    async fn update_checklist_template(
        &self,
        template: &ChecklistItemTemplate,
    ) -> Result<(), StoreError> {
        let mut state = self.locked();
        if !state.templates.contains_key(&template.id) {
            return Err(StoreError::NotFound(format!("checklist template {}", template.id)));
        }
        state.templates.insert(template.id.clone(), template.clone());
        self.persist(TEMPLATES_FILE, &state.templates);
        Ok(())
    }

    async fn delete_checklist_template(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.locked();
        if state.templates.remove(id).is_none() {
            return Err(StoreError::NotFound(format!("checklist template {id}")));
        }
        self.persist(TEMPLATES_FILE, &state.templates);
        Ok(())
    }

    async fn list_checklist_templates(&self) -> Result<Vec<ChecklistItemTemplate>, StoreError> {
        let state = self.locked();
        let mut templates: Vec<ChecklistItemTemplate> = state.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(templates)
    }

    async fn set_checklist_status(
        &self,
        key: &str,
        status: &SimpleChecklistStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.locked();
        state.statuses.insert(key.to_string(), status.clone());
        self.persist(STATUSES_FILE, &state.statuses);
        Ok(())
    }

    async fn get_checklist_status(
        &self,
        key: &str,
    ) -> Result<SimpleChecklistStatus, StoreError> {
        self.locked()
            .statuses
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("checklist status {key}")))
    }

    async fn list_checklist_statuses(
        &self,
    ) -> Result<HashMap<String, SimpleChecklistStatus>, StoreError> {
        Ok(self.locked().statuses.clone())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.locked();
        Ok(StoreStats {
            asset_count: state.assets.len() as u64,
            job_count: state.jobs.len() as u64,
            scan_result_count: state.scan_results.len() as u64,
            script_count: state.scripts.len() as u64,
            checklist_template_count: state.templates.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;
    use surfmap_types::{ChecklistScope, Decision, JobType};

    use super::*;

    fn make_asset(value: &str) -> Asset {
        Asset::new(AssetKind::Ip, value)
    }

    fn make_result(asset_id: &str, script: &str) -> ScanResult {
        ScanResult {
            id: format!("{asset_id}-{script}"),
            asset_id: asset_id.to_string(),
            script_name: script.to_string(),
            executed_at: Utc::now(),
            success: true,
            decision: Decision::Na,
            output: vec![],
            error: None,
            duration_ms: 1,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn asset_crud_round_trip() {
        let store = JsonStore::open_in_memory();
        let asset = make_asset("1.2.3.4");
        store.create_asset(&asset).await.unwrap();

        let fetched = store.get_asset(&asset.id).await.unwrap();
        assert_eq!(fetched.value, "1.2.3.4");

        let mut updated = fetched.clone();
        updated.scan_count = 2;
        store.update_asset(&updated).await.unwrap();
        assert_eq!(store.get_asset(&asset.id).await.unwrap().scan_count, 2);

        store.delete_asset(&asset.id).await.unwrap();
        assert!(store.get_asset(&asset.id).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = JsonStore::open_in_memory();
        let asset = make_asset("1.2.3.4");
        store.create_asset(&asset).await.unwrap();
        let err = store.create_asset(&asset).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_asset_not_found() {
        let store = JsonStore::open_in_memory();
        assert!(matches!(
            store.get_asset("missing").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.update_asset(&make_asset("9.9.9.9")).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn clear_all_drops_assets_and_results() {
        let store = JsonStore::open_in_memory();
        let asset = make_asset("1.2.3.4");
        store.create_asset(&asset).await.unwrap();
        store.create_scan_result(&make_result(&asset.id, "a.lua")).await.unwrap();

        store.clear_all_assets().await.unwrap();
        assert!(store.list_assets(None).await.unwrap().is_empty());
        assert!(store.list_scan_results().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_assets_applies_filter() {
        let store = JsonStore::open_in_memory();
        store.create_asset(&Asset::new(AssetKind::Domain, "example.com")).await.unwrap();
        store.create_asset(&make_asset("1.2.3.4")).await.unwrap();

        let filter = AssetFilter { kinds: vec![AssetKind::Ip], ..Default::default() };
        let assets = store.list_assets(Some(&filter)).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].kind, AssetKind::Ip);

        let by_kind = store.get_assets_by_kind(AssetKind::Domain).await.unwrap();
        assert_eq!(by_kind.len(), 1);
        assert_eq!(by_kind[0].value, "example.com");
    }

    #[tokio::test]
    async fn purge_scan_results_by_asset() {
        let store = JsonStore::open_in_memory();
        store.create_scan_result(&make_result("a1", "x.lua")).await.unwrap();
        store.create_scan_result(&make_result("a1", "y.lua")).await.unwrap();
        store.create_scan_result(&make_result("a2", "x.lua")).await.unwrap();

        store.clear_scan_results_by_asset("a1").await.unwrap();
        assert!(store.get_scan_results_by_asset("a1").await.unwrap().is_empty());
        assert_eq!(store.get_scan_results_by_asset("a2").await.unwrap().len(), 1);
        assert_eq!(store.get_scan_results_by_script("x.lua").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_jobs_excludes_finished() {
        let store = JsonStore::open_in_memory();
        let mut running = Job::new("j1", JobType::Discovery);
        running.status = surfmap_types::JobStatus::Running;
        let mut done = Job::new("j2", JobType::ScanAll);
        done.status = surfmap_types::JobStatus::Completed;
        store.create_job(&running).await.unwrap();
        store.create_job(&done).await.unwrap();

        let active = store.get_active_jobs().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "j1");
    }

    #[tokio::test]
    async fn checklist_status_set_and_list() {
        let store = JsonStore::open_in_memory();
        let status = SimpleChecklistStatus {
            key: "global:T1".into(),
            status: surfmap_types::ChecklistStatus::Yes,
            notes: "done".into(),
            updated_at: Utc::now(),
            attachments: vec![],
        };
        store.set_checklist_status("global:T1", &status).await.unwrap();

        let fetched = store.get_checklist_status("global:T1").await.unwrap();
        assert_eq!(fetched.notes, "done");

        let all = store.list_checklist_statuses().await.unwrap();
        assert!(all.contains_key("global:T1"));
    }

    #[tokio::test]
    async fn templates_sorted_by_id() {
        let store = JsonStore::open_in_memory();
        for id in ["T9", "T1", "T5"] {
            store
                .create_checklist_template(&ChecklistItemTemplate {
                    id: id.into(),
                    title: id.into(),
                    description: String::new(),
                    category: String::new(),
                    scope: ChecklistScope::Global,
                    asset_types: vec![],
                    evidence_rules: vec![],
                    script_controlled: false,
                })
                .await
                .unwrap();
        }
        let templates = store.list_checklist_templates().await.unwrap();
        let ids: Vec<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T5", "T9"]);
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = std::env::temp_dir().join("surfmap_store_reopen");
        let _ = std::fs::remove_dir_all(&dir);

        {
            let store = JsonStore::open(&dir).unwrap();
            store.create_asset(&make_asset("1.2.3.4")).await.unwrap();
            store.create_job(&Job::new("j1", JobType::Discovery)).await.unwrap();
        }

        let store = JsonStore::open(&dir).unwrap();
        assert_eq!(store.list_assets(None).await.unwrap().len(), 1);
        assert!(store.get_job("j1").await.is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stats_counts_collections() {
        let store = JsonStore::open_in_memory();
        store.create_asset(&make_asset("1.2.3.4")).await.unwrap();
        store.create_scan_result(&make_result("a1", "x.lua")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.asset_count, 1);
        assert_eq!(stats.scan_result_count, 1);
        assert_eq!(stats.job_count, 0);
    }
}
