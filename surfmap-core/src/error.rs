use surfmap_store::StoreError;

/// Application-level error kinds. Each maps to a stable textual name that
/// outer surfaces (CLI, HTTP) can translate without string matching.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("operation timeout: {0}")]
    Timeout(String),
    #[error("external tool failed: {0}")]
    ExternalTool(String),
    #[error("script failure: {0}")]
    Script(String),
    #[error("storage operation failed: {0}")]
    Storage(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::ExternalTool(_) => "external_tool_failure",
            Self::Script(_) => "script_failure",
            Self::Storage(_) => "storage_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::Conflict(what),
            other => Self::Storage(other.to_string()),
        }
    }
}
