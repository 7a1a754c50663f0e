//! Change-approval state machine: one pending approval per task batches the
//! task's uncommitted diffs until a human approves (commit) or rejects
//! (revert) them.

pub mod machine;
pub mod revert;
mod service;

pub use machine::{is_valid_transition, transition, transition_diff, ApprovalUpdate};
pub use revert::revert_diff;
pub use service::{task_branch_name, ApprovalService, FileRevert, RejectOutcome};

use std::path::PathBuf;
use warden_core::{ApprovalStatus, StoreError, VcsError};

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval not found: {0}")]
    NotFound(String),
    #[error("approval {id} is already resolved ({status:?})")]
    AlreadyResolved { id: String, status: ApprovalStatus },
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("version control is not initialized at {0}")]
    NoVersionControl(PathBuf),
    #[error("approval {0} has no uncommitted changes to commit")]
    NoChangesToCommit(String),
    #[error("invalid approval transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
    /// The commit or the reverts happened, but some records could not be
    /// saved. A pending approval left behind can be approved or rejected
    /// again to finish recording it.
    #[error(
        "approval {approval_id} was {status:?} but {} record(s) could not be saved: {}",
        failures.len(),
        failures.join("; ")
    )]
    Unrecorded {
        approval_id: String,
        status: ApprovalStatus,
        commit_sha: Option<String>,
        reverted: Vec<PathBuf>,
        failures: Vec<String>,
    },
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApprovalError {
    /// Precondition violations never succeed on retry; git and storage
    /// failures might.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApprovalError::Vcs(e) => e.is_retryable(),
            ApprovalError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
