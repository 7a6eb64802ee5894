use thiserror::Error;

/// Main error type for the dispatch engine
#[derive(Error, Debug)]
pub enum JobMeshError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Construction errors (raised synchronously, before exec)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Submission errors (backend rejected the job, staging failed)
    #[error("Job submission failed: {0}")]
    Submission(String),

    // Handle used after the job's dispatch engine stopped
    #[error("Job '{0}' is no longer running")]
    NotRunning(String),

    // Slice errors
    #[error("Slice {slice} failed: {message}")]
    SliceFailed { slice: usize, message: String },

    // Terminal job states surfaced through wait()
    #[error("Job cancelled; unresolved slices: {unresolved:?}")]
    Cancelled { unresolved: Vec<usize> },

    #[error("Job errored: {reason}; unresolved slices: {unresolved:?}")]
    Errored {
        reason: String,
        unresolved: Vec<usize>,
    },

    // External collaborator errors (oracle, payment account, executors)
    #[error("{component} error: {reason}")]
    Collaborator { component: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl JobMeshError {
    pub fn collaborator(component: &str, reason: impl Into<String>) -> Self {
        JobMeshError::Collaborator {
            component: component.to_string(),
            reason: reason.into(),
        }
    }

    /// Slices still unresolved when the job terminated, if this is a terminal failure
    pub fn unresolved_slices(&self) -> Option<&[usize]> {
        match self {
            JobMeshError::Cancelled { unresolved } => Some(unresolved),
            JobMeshError::Errored { unresolved, .. } => Some(unresolved),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobMeshError::Cancelled { .. })
    }
}

/// Result type alias for JobMeshError
pub type Result<T> = std::result::Result<T, JobMeshError>;
