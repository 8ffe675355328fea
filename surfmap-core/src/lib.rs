pub mod checklist;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod scanning;

pub use checklist::ChecklistService;
pub use config::AppConfig;
pub use convert::prepare_for_store;
pub use discovery::DiscoveryService;
pub use error::CoreError;
pub use jobs::JobRegistry;
pub use scanning::ScanService;
