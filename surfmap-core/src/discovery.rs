use std::sync::Arc;

use serde_json::json;
use surfmap_recon::ReconPipeline;
use surfmap_store::{Store, StoreError};
use surfmap_types::{Job, JobType, ReconConfig, ReconOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::convert::prepare_for_store;
use crate::error::CoreError;
use crate::jobs::JobRegistry;

/// Drives the recon pipeline and persists the asset stream.
///
/// Only one discovery may run at a time; a second request while one is
/// `running` is a conflict. Progress advances on each emitted asset so the
/// job can be observed live.
#[derive(Clone)]
pub struct DiscoveryService {
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    pipeline: ReconPipeline,
    config: ReconConfig,
}

impl DiscoveryService {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
        pipeline: ReconPipeline,
        config: ReconConfig,
    ) -> Self {
        Self { store, registry, pipeline, config }
    }

    /// Start asset discovery for the given seeds. Returns the running job;
    /// discovery itself continues in the background.
    pub async fn start(&self, hosts: Vec<String>) -> Result<Job, CoreError> {
        if hosts.is_empty() {
            return Err(CoreError::Validation("at least one host is required".into()));
        }
        if self.registry.has_running(JobType::Discovery) {
            return Err(CoreError::Conflict("discovery job already in progress".into()));
        }

        let mut job = self.registry.start(JobType::Discovery);
        job.metadata.insert("hosts".into(), json!(hosts));
        job.metadata.insert("host_count".into(), json!(hosts.len()));
        self.registry.upsert(job.clone());
        self.store.create_job(&job).await?;

        // Assets are only ever replaced wholesale, at the start of a new
        // discovery. A failed clear is logged and discovery proceeds.
        if let Err(e) = self.store.clear_all_assets().await {
            warn!(error = %e, "failed to clear existing assets before discovery");
        }

        info!(job = %job.id, hosts = hosts.len(), "starting discovery");
        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            service.run(&job_id, hosts).await;
        });

        Ok(job)
    }

    async fn run(&self, job_id: &str, hosts: Vec<String>) {
        let cancel = CancellationToken::new();

        // Pipeline-wide deadline: cancel the stream if discovery overruns
        let watchdog = {
            let cancel = cancel.clone();
            let timeout = self.config.default_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };

        let options = ReconOptions::from_config(hosts, &self.config);
        let mut rx = self.pipeline.discover(options, cancel.clone());

        let mut assets_found: u32 = 0;
        while let Some(mut asset) = rx.recv().await {
            prepare_for_store(&mut asset);

            match self.store.create_asset(&asset).await {
                Ok(()) => {}
                Err(StoreError::Conflict(_)) => {
                    // Re-discovery of a known asset refreshes its timestamp
                    if let Ok(mut existing) = self.store.get_asset(&asset.id).await {
                        existing.discovered_at = asset.discovered_at;
                        if let Err(e) = self.store.update_asset(&existing).await {
                            warn!(asset = %asset.id, error = %e, "failed to refresh existing asset");
                        }
                    }
                }
                Err(e) => {
                    warn!(asset = %asset.id, error = %e, "failed to persist asset");
                }
            }

            assets_found += 1;
            if let Some(mut job) = self.registry.get(job_id) {
                job.progress.completed = assets_found;
                job.metadata.insert("assets_found_so_far".into(), json!(assets_found));
                self.persist_job(job).await;
            }
        }

        let timed_out = cancel.is_cancelled();
        watchdog.abort();

        if timed_out {
            warn!(job = %job_id, assets_found, "discovery timed out");
            self.registry.fail(
                job_id,
                CoreError::Timeout("discovery exceeded its deadline".into()).to_string(),
            );
        } else {
            info!(job = %job_id, assets_found, "discovery completed");
            self.registry.complete(job_id);
        }

        if let Some(mut job) = self.registry.get(job_id) {
            job.metadata.insert("assets_found".into(), json!(assets_found));
            self.persist_job(job).await;
        }
    }

    async fn persist_job(&self, job: Job) {
        self.registry.upsert(job.clone());
        if let Err(e) = self.store.update_job(&job).await {
            warn!(job = %job.id, error = %e, "failed to persist job update");
        }
    }
}
