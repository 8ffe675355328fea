use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use rand::RngCore;
use surfmap_types::{Job, JobStatus, JobType, job_id};

/// In-memory job table guarded by a single read/write mutex.
///
/// The registry is the fast path for conflict checks and progress reads;
/// the store keeps the durable copy. No process-wide singletons: one
/// registry is owned by the services that share it.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in `running` state with a fresh `{type}_{hex}` id.
    pub fn start(&self, job_type: JobType) -> Job {
        let mut random = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut random);
        let mut job = Job::new(job_id(&job_type.to_string(), random), job_type);
        job.status = JobStatus::Running;
        self.upsert(job.clone());
        job
    }

    pub fn upsert(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Whether any job of the given type is currently running. Discovery
    /// uses this to enforce its single-flight invariant.
    pub fn has_running(&self, job_type: JobType) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .any(|job| job.job_type == job_type && job.is_running())
    }

    /// Mark a job completed, stamping the completion time.
    pub fn complete(&self, id: &str) {
        self.finish(id, JobStatus::Completed, None);
    }

    /// Mark a job failed with an error message.
    pub fn fail(&self, id: &str, error: impl Into<String>) {
        self.finish(id, JobStatus::Failed, Some(error.into()));
    }

    fn finish(&self, id: &str, status: JobStatus, error: Option<String>) {
        let mut jobs = self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(job) = jobs.get_mut(id) {
            job.status = status;
            job.completed_at = Some(Utc::now());
            if error.is_some() {
                job.error = error;
            }
        }
    }
}
