use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("external tool failed: {0}")]
    ExternalTool(String),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    #[error("resolution failed: {0}")]
    Resolve(String),
    #[error("discovery cancelled")]
    Cancelled,
}
