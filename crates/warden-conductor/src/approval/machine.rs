use warden_core::{now_rfc3339, ApprovalStatus, Diff, DiffStatus, GitCommitApproval};

use super::ApprovalError;

// ── Valid transitions ──

const APPROVAL_TRANSITIONS: &[(ApprovalStatus, &[ApprovalStatus])] = &[(
    ApprovalStatus::Pending,
    &[ApprovalStatus::Approved, ApprovalStatus::Rejected],
)];
// Approved and Rejected are terminal

const DIFF_TRANSITIONS: &[(DiffStatus, &[DiffStatus])] = &[
    (
        DiffStatus::Pending,
        &[DiffStatus::Approved, DiffStatus::Rejected],
    ),
    (DiffStatus::Approved, &[DiffStatus::Applied, DiffStatus::Pending]), // commit failed
];

fn allowed<S: PartialEq + Copy>(table: &[(S, &[S])], from: S, to: S) -> bool {
    table
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

pub fn is_valid_transition(from: ApprovalStatus, to: ApprovalStatus) -> bool {
    allowed(APPROVAL_TRANSITIONS, from, to)
}

// ── Side effects ──

/// Fields stamped during a transition.
#[derive(Debug, Clone, Default)]
pub struct ApprovalUpdate {
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub resolved_at: Option<String>,
}

impl ApprovalUpdate {
    pub fn resolved_now() -> Self {
        Self {
            resolved_at: Some(now_rfc3339()),
            ..Default::default()
        }
    }

    fn apply(self, approval: &mut GitCommitApproval) {
        if let Some(v) = self.commit_sha {
            approval.commit_sha = Some(v);
        }
        if let Some(v) = self.commit_message {
            approval.commit_message = v;
        }
        if let Some(v) = self.resolved_at {
            approval.updated_at = Some(v.clone());
            approval.resolved_at = Some(v);
        }
    }
}

// ── CAS-guarded transition ──

/// Move `approval` from `from` to `to`, applying side effects.
/// Returns Ok(false) on a CAS miss (current status != from).
pub fn transition(
    approval: &mut GitCommitApproval,
    from: ApprovalStatus,
    to: ApprovalStatus,
    side_effect: Option<ApprovalUpdate>,
) -> Result<bool, ApprovalError> {
    if approval.status != from {
        return Ok(false);
    }
    if !is_valid_transition(from, to) {
        return Err(ApprovalError::InvalidTransition { from, to });
    }
    approval.status = to;
    if let Some(update) = side_effect {
        update.apply(approval);
    }
    Ok(true)
}

/// Move a diff to `to` if the table allows it from its current status.
pub fn transition_diff(diff: &mut Diff, to: DiffStatus) -> bool {
    if !allowed(DIFF_TRANSITIONS, diff.status, to) {
        return false;
    }
    diff.status = to;
    if to == DiffStatus::Applied {
        diff.applied_at = Some(now_rfc3339());
        diff.clear_content();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_core::{DiffKind, DiffSummary};

    fn approval() -> GitCommitApproval {
        GitCommitApproval {
            id: "apr_1".into(),
            task_id: "task_1".into(),
            project_id: "prj_1".into(),
            session_id: "ses_1".into(),
            attempt_number: 1,
            status: ApprovalStatus::Pending,
            commit_message: "msg".into(),
            files_changed: vec!["a.ts".into()],
            diff_summary: DiffSummary::default(),
            commit_sha: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: None,
            resolved_at: None,
        }
    }

    #[test]
    fn pending_to_approved_stamps_commit() {
        let mut a = approval();
        let ok = transition(
            &mut a,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            Some(ApprovalUpdate {
                commit_sha: Some("abc".into()),
                commit_message: Some("override".into()),
                resolved_at: Some("2026-01-02T00:00:00Z".into()),
            }),
        )
        .unwrap();
        assert!(ok);
        assert_eq!(a.status, ApprovalStatus::Approved);
        assert_eq!(a.commit_sha.as_deref(), Some("abc"));
        assert_eq!(a.commit_message, "override");
        assert_eq!(a.resolved_at.as_deref(), Some("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn cas_miss_returns_false() {
        let mut a = approval();
        a.status = ApprovalStatus::Rejected;
        let ok = transition(
            &mut a,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            None,
        )
        .unwrap();
        assert!(!ok);
        assert_eq!(a.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for from in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            let mut a = approval();
            a.status = from;
            let err = transition(&mut a, from, ApprovalStatus::Pending, None);
            assert!(matches!(err, Err(ApprovalError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn applied_diff_keeps_path_but_drops_content() {
        let mut d = Diff {
            id: "dif_1".into(),
            session_id: "ses_1".into(),
            task_id: "task_1".into(),
            tool_invocation_id: "tu_1".into(),
            file_path: PathBuf::from("/repo/b.ts"),
            kind: DiffKind::Write,
            hunks: vec![],
            full_content: Some("x".into()),
            previous_content: None,
            moved_to: None,
            status: DiffStatus::Pending,
            approval_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            applied_at: None,
        };
        assert!(!transition_diff(&mut d, DiffStatus::Applied));
        assert!(transition_diff(&mut d, DiffStatus::Approved));
        assert!(transition_diff(&mut d, DiffStatus::Applied));
        assert!(d.full_content.is_none());
        assert!(d.applied_at.is_some());
        assert_eq!(d.file_path, PathBuf::from("/repo/b.ts"));
        assert!(!transition_diff(&mut d, DiffStatus::Rejected));
    }
}
