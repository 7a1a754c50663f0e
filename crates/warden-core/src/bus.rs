use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::ports::CommitInfo;
use crate::types::{
    ApprovalId, ApprovalStatus, DiffId, DiffKind, GitCommitApproval, SessionId, SessionStatus,
    TaskId,
};

/// Events published by the core for UIs and notification sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BusEvent {
    ApprovalCreated {
        approval: GitCommitApproval,
    },
    ApprovalUpdated {
        approval: GitCommitApproval,
    },
    ApprovalResolved {
        approval_id: ApprovalId,
        task_id: TaskId,
        status: ApprovalStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<CommitInfo>,
    },
    BranchCreated {
        task_id: TaskId,
        branch: String,
    },
    BranchDeleted {
        task_id: TaskId,
        branch: String,
    },
    SessionStatusChanged {
        session_id: SessionId,
        task_id: TaskId,
        status: SessionStatus,
    },
    DiffCreated {
        diff_id: DiffId,
        session_id: SessionId,
        task_id: TaskId,
        file_path: PathBuf,
        kind: DiffKind,
    },
    /// A provider asked whether a tool call may proceed and nothing answered it.
    PermissionRequested {
        session_id: SessionId,
        request_id: String,
        tool_name: String,
        input: Value,
    },
}

impl BusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::ApprovalCreated { .. } => "approval-created",
            BusEvent::ApprovalUpdated { .. } => "approval-updated",
            BusEvent::ApprovalResolved { .. } => "approval-resolved",
            BusEvent::BranchCreated { .. } => "branch-created",
            BusEvent::BranchDeleted { .. } => "branch-deleted",
            BusEvent::SessionStatusChanged { .. } => "session-status-changed",
            BusEvent::DiffCreated { .. } => "diff-created",
            BusEvent::PermissionRequested { .. } => "permission-requested",
        }
    }
}

pub trait EventBus: Send + Sync {
    fn publish(&self, event: BusEvent);
}

/// Bus that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl EventBus for NullBus {
    fn publish(&self, _event: BusEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_name() {
        let ev = BusEvent::BranchCreated {
            task_id: "task_1".into(),
            branch: "warden/task_1".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], ev.name());
        assert_eq!(v["branch"], "warden/task_1");
    }

    #[test]
    fn resolved_omits_missing_commit() {
        let ev = BusEvent::ApprovalResolved {
            approval_id: "apr_1".into(),
            task_id: "task_1".into(),
            status: ApprovalStatus::Rejected,
            commit: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "approval-resolved");
        assert_eq!(v["status"], "rejected");
        assert!(v.get("commit").is_none());
    }
}
