pub mod asset;
pub mod checklist;
pub mod config;
pub mod id;
pub mod job;
pub mod script;

pub use asset::{Asset, AssetFilter, AssetKind, AssetStatus, DnsRecords};
pub use checklist::{
    AssetCoverage, ChecklistItemTemplate, ChecklistScope, ChecklistSource, ChecklistStatus,
    DerivedChecklistItem, EvidenceOp, EvidenceRule, SimpleChecklistStatus,
};
pub use config::{ReconConfig, ReconOptions, ScannerConfig};
pub use id::{asset_id, asset_key, global_key, job_id, service_id};
pub use job::{Job, JobProgress, JobStatus, JobType};
pub use script::{Decision, ScanResult, Script};
