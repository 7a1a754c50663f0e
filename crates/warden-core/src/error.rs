use std::path::PathBuf;

/// Failures of the repository ports.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict on {kind} {id}: {reason}")]
    Conflict {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store data is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("could not lock store: {0}")]
    Lock(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Storage failures are transport-class; callers may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Lock(_))
    }
}

/// Failures of the version-control port.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("{0} is not a git repository")]
    NotARepository(PathBuf),
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("could not run git: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VcsError::Io(_))
    }
}
