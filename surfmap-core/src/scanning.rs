use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use surfmap_script::ScanEngine;
use surfmap_store::Store;
use surfmap_types::{Asset, AssetFilter, AssetKind, AssetStatus, Job, JobType, ScanResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::checklist::ChecklistService;
use crate::error::CoreError;
use crate::jobs::JobRegistry;

/// Scan book-keeping around the script engine: status transitions,
/// purge-on-rescan, job progress, checklist propagation.
///
/// The `scanning` status is the mutual-exclusion bit: a scan request for an
/// asset already in `scanning` is a conflict, checked at entry.
#[derive(Clone)]
pub struct ScanService {
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    engine: Arc<ScanEngine>,
    checklist: Arc<ChecklistService>,
    max_concurrent: usize,
}

impl ScanService {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
        engine: Arc<ScanEngine>,
        checklist: Arc<ChecklistService>,
        max_concurrent: usize,
    ) -> Self {
        Self { store, registry, engine, checklist, max_concurrent: max_concurrent.max(1) }
    }

    /// Start a scan of one asset. Returns the running job immediately.
    pub async fn start_asset_scan(
        &self,
        asset_id: &str,
        scripts: Vec<String>,
    ) -> Result<Job, CoreError> {
        let mut asset = self.store.get_asset(asset_id).await?;
        if !asset.can_be_scanned() {
            return Err(CoreError::Conflict("asset is currently being scanned".into()));
        }

        let mut job = self.registry.start(JobType::ScanAsset);
        job.metadata.insert("asset_id".into(), json!(asset_id));
        job.metadata.insert("scripts".into(), json!(scripts));
        self.registry.upsert(job.clone());
        self.store.create_job(&job).await?;

        asset.status = AssetStatus::Scanning;
        self.store.update_asset(&asset).await?;

        info!(job = %job.id, asset = %asset_id, "starting asset scan");
        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            service.run_asset_scan(&job_id, asset, scripts).await;
        });

        Ok(job)
    }

    async fn run_asset_scan(&self, job_id: &str, mut asset: Asset, scripts: Vec<String>) {
        let results = self.scan_one(&mut asset, &scripts).await;

        // The single-asset path treats an all-failure scan as a failed job
        // and marks the asset errored; partial failures still count as a
        // completed scan of the asset.
        let all_failed = !results.is_empty() && results.iter().all(|r| !r.success);
        if all_failed {
            asset.status = AssetStatus::Error;
            if let Err(e) = self.store.update_asset(&asset).await {
                warn!(asset = %asset.id, error = %e, "failed to record asset error state");
            }
            self.registry.fail(job_id, "every script failed against the asset");
            self.sync_job(job_id).await;
            return;
        }

        if let Err(e) = self.finish_asset(&mut asset, &results).await {
            asset.status = AssetStatus::Error;
            let _ = self.store.update_asset(&asset).await;
            self.registry.fail(job_id, e.to_string());
            self.sync_job(job_id).await;
            return;
        }

        if let Some(mut job) = self.registry.get(job_id) {
            job.progress.total = 1;
            job.progress.completed = 1;
            self.registry.upsert(job);
        }
        self.registry.complete(job_id);
        self.sync_job(job_id).await;
    }

    /// Start a scan of every scannable asset, optionally restricted by kind.
    pub async fn start_all_assets_scan(
        &self,
        kinds: Vec<AssetKind>,
        scripts: Vec<String>,
    ) -> Result<Job, CoreError> {
        let filter = AssetFilter { kinds, ..Default::default() };
        let assets = self.store.list_assets(Some(&filter)).await?;
        let scannable: Vec<Asset> =
            assets.into_iter().filter(|asset| asset.can_be_scanned()).collect();

        if scannable.is_empty() {
            return Err(CoreError::Validation("no assets available for scanning".into()));
        }

        let mut job = self.registry.start(JobType::ScanAll);
        job.progress.total = scannable.len() as u32;
        job.metadata.insert("asset_count".into(), json!(scannable.len()));
        job.metadata.insert("scripts".into(), json!(scripts));
        self.registry.upsert(job.clone());
        self.store.create_job(&job).await?;

        info!(job = %job.id, assets = scannable.len(), "starting scan of all assets");
        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            service.run_all_assets_scan(&job_id, scannable, scripts).await;
        });

        Ok(job)
    }

    async fn run_all_assets_scan(&self, job_id: &str, assets: Vec<Asset>, scripts: Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Result<(), CoreError>> = JoinSet::new();

        for mut asset in assets {
            let service = self.clone();
            let scripts = scripts.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;

                asset.status = AssetStatus::Scanning;
                service.store.update_asset(&asset).await?;

                let results = service.scan_one(&mut asset, &scripts).await;
                service.finish_asset(&mut asset, &results).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(CoreError::Script(format!("scan task failed: {e}"))),
            };
            if let Some(mut job) = self.registry.get(job_id) {
                match outcome {
                    Ok(()) => job.progress.completed += 1,
                    Err(e) => {
                        warn!(job = %job_id, error = %e, "asset scan failed");
                        job.progress.failed += 1;
                    }
                }
                self.registry.upsert(job);
            }
            self.sync_job(job_id).await;
        }

        self.registry.complete(job_id);
        self.sync_job(job_id).await;
        info!(job = %job_id, "scan of all assets finished");
    }

    /// Purge prior results and run the engine for one asset.
    async fn scan_one(&self, asset: &mut Asset, scripts: &[String]) -> Vec<ScanResult> {
        // Rescans always start clean: prior results are purged and the
        // asset's scan bookkeeping reset before new results land.
        if let Err(e) = self.store.clear_scan_results_by_asset(&asset.id).await {
            warn!(asset = %asset.id, error = %e, "failed to clear previous scan results");
        }
        asset.scan_results.clear();
        asset.scan_count = 0;
        asset.last_scanned_at = None;

        self.engine.scan_asset(asset, scripts).await
    }

    /// Persist results, advance the asset to `scanned`, propagate checklist
    /// verdicts.
    async fn finish_asset(
        &self,
        asset: &mut Asset,
        results: &[ScanResult],
    ) -> Result<(), CoreError> {
        for result in results {
            self.store.create_scan_result(result).await?;
        }

        asset.status = AssetStatus::Scanned;
        asset.scan_count += 1;
        asset.last_scanned_at = Some(Utc::now());
        asset.scan_results = results.to_vec();
        self.store.update_asset(asset).await?;

        if let Err(e) = self.checklist.process_scan_results(&asset.id, results).await {
            warn!(asset = %asset.id, error = %e, "failed to propagate checklist verdicts");
        }
        Ok(())
    }

    async fn sync_job(&self, job_id: &str) {
        if let Some(job) = self.registry.get(job_id) {
            if let Err(e) = self.store.update_job(&job).await {
                warn!(job = %job_id, error = %e, "failed to persist job update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use surfmap_store::JsonStore;
    use surfmap_types::{ChecklistItemTemplate, ChecklistScope, JobStatus, ScannerConfig};

    use super::*;

    fn scripts_dir(name: &str, scripts: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("surfmap_scan_service_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for (file, content) in scripts {
            fs::write(dir.join(file), content).unwrap();
        }
        dir
    }

    fn service_with_scripts(dir: &PathBuf) -> (ScanService, Arc<JsonStore>, Arc<JobRegistry>) {
        let store = Arc::new(JsonStore::open_in_memory());
        let registry = Arc::new(JobRegistry::new());
        let engine = Arc::new(
            ScanEngine::new(ScannerConfig {
                scripts_dir: dir.to_str().unwrap().to_string(),
                default_timeout: Duration::from_secs(10),
                ..Default::default()
            })
            .unwrap(),
        );
        let checklist = Arc::new(ChecklistService::new(store.clone()));
        let service = ScanService::new(store.clone(), registry.clone(), engine, checklist, 5);
        (service, store, registry)
    }

    async fn wait_for_finish(registry: &JobRegistry, job_id: &str) -> Job {
        for _ in 0..300 {
            if let Some(job) = registry.get(job_id) {
                if job.is_finished() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn scan_updates_asset_and_stores_results() {
        let dir = scripts_dir("basic", &[("a.lua", r#"pass() add_tag("checked")"#)]);
        let (service, store, registry) = service_with_scripts(&dir);

        let asset = Asset::new(AssetKind::Ip, "10.0.0.1");
        store.create_asset(&asset).await.unwrap();

        let job = service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        let finished = wait_for_finish(&registry, &job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.completed, 1);

        let scanned = store.get_asset(&asset.id).await.unwrap();
        assert_eq!(scanned.status, AssetStatus::Scanned);
        assert_eq!(scanned.scan_count, 1);
        assert!(scanned.last_scanned_at.is_some());
        assert_eq!(scanned.tags, vec!["checked"]);
        assert_eq!(scanned.scan_results.len(), 1);

        let results = store.get_scan_results_by_asset(&asset.id).await.unwrap();
        assert_eq!(results.len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn concurrent_scan_of_same_asset_conflicts() {
        let dir = scripts_dir("conflict", &[("slow.lua", "sleep(0.5) pass()")]);
        let (service, store, _) = service_with_scripts(&dir);

        let asset = Asset::new(AssetKind::Ip, "10.0.0.2");
        store.create_asset(&asset).await.unwrap();

        service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        let err = service.start_asset_scan(&asset.id, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rescan_purges_prior_results() {
        let dir = scripts_dir("rescan", &[("a.lua", "pass()")]);
        let (service, store, registry) = service_with_scripts(&dir);

        let asset = Asset::new(AssetKind::Ip, "10.0.0.3");
        store.create_asset(&asset).await.unwrap();

        let job = service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        wait_for_finish(&registry, &job.id).await;
        let job = service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        wait_for_finish(&registry, &job.id).await;

        let results = store.get_scan_results_by_asset(&asset.id).await.unwrap();
        assert_eq!(results.len(), 1);
        let rescanned = store.get_asset(&asset.id).await.unwrap();
        assert_eq!(rescanned.scan_count, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn all_failing_scripts_error_the_asset() {
        let dir = scripts_dir("failing", &[("bad.lua", r#"error("broken")"#)]);
        let (service, store, registry) = service_with_scripts(&dir);

        let asset = Asset::new(AssetKind::Ip, "10.0.0.4");
        store.create_asset(&asset).await.unwrap();

        let job = service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        let finished = wait_for_finish(&registry, &job.id).await;
        assert_eq!(finished.status, JobStatus::Failed);

        let errored = store.get_asset(&asset.id).await.unwrap();
        assert_eq!(errored.status, AssetStatus::Error);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_asset_not_found() {
        let dir = scripts_dir("missing", &[("a.lua", "pass()")]);
        let (service, _, _) = service_with_scripts(&dir);
        let err = service.start_asset_scan("ghost", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn scan_all_counts_progress() {
        let dir = scripts_dir("all", &[("a.lua", "pass()")]);
        let (service, store, registry) = service_with_scripts(&dir);

        for value in ["10.0.1.1", "10.0.1.2", "10.0.1.3"] {
            store.create_asset(&Asset::new(AssetKind::Ip, value)).await.unwrap();
        }

        let job = service.start_all_assets_scan(vec![], vec![]).await.unwrap();
        assert_eq!(job.progress.total, 3);
        let finished = wait_for_finish(&registry, &job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.completed, 3);
        assert_eq!(finished.progress.failed, 0);

        for asset in store.list_assets(None).await.unwrap() {
            assert_eq!(asset.status, AssetStatus::Scanned);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn scan_all_with_no_assets_rejected() {
        let dir = scripts_dir("empty", &[("a.lua", "pass()")]);
        let (service, _, _) = service_with_scripts(&dir);
        let err = service.start_all_assets_scan(vec![], vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn scan_all_respects_kind_filter() {
        let dir = scripts_dir("kinds", &[("a.lua", "pass()")]);
        let (service, store, registry) = service_with_scripts(&dir);

        store.create_asset(&Asset::new(AssetKind::Ip, "10.0.2.1")).await.unwrap();
        store.create_asset(&Asset::new(AssetKind::Domain, "example.com")).await.unwrap();

        let job = service
            .start_all_assets_scan(vec![AssetKind::Ip], vec![])
            .await
            .unwrap();
        assert_eq!(job.progress.total, 1);
        wait_for_finish(&registry, &job.id).await;

        let domain = store
            .get_assets_by_kind(AssetKind::Domain)
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(domain.status, AssetStatus::Discovered);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn checklist_verdicts_propagate_to_statuses() {
        let dir = scripts_dir(
            "verdicts",
            &[("check.lua", r#"pass_checklist("T1", "ok") pass()"#)],
        );
        let (service, store, registry) = service_with_scripts(&dir);

        store
            .create_checklist_template(&ChecklistItemTemplate {
                id: "T1".into(),
                title: "tls".into(),
                description: String::new(),
                category: String::new(),
                scope: ChecklistScope::Asset,
                asset_types: vec![],
                evidence_rules: vec![],
                script_controlled: true,
            })
            .await
            .unwrap();

        let asset = Asset::new(AssetKind::Ip, "10.0.3.1");
        store.create_asset(&asset).await.unwrap();

        let job = service.start_asset_scan(&asset.id, vec![]).await.unwrap();
        wait_for_finish(&registry, &job.id).await;

        let statuses = store.list_checklist_statuses().await.unwrap();
        let key = surfmap_types::asset_key(&asset.id, "T1");
        assert_eq!(statuses[&key].status, surfmap_types::ChecklistStatus::Yes);
        assert_eq!(statuses[&key].notes, "ok");

        let _ = fs::remove_dir_all(&dir);
    }
}
