use std::sync::RwLock;
use warden_core::{StoreError, StoreResult};

use crate::tables::{impl_repositories, TableAccess, Tables};

/// Process-local store. Used by tests and by embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoreResult<Tables> {
        self.read(Tables::clone)
    }
}

impl TableAccess for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> StoreResult<R> {
        let guard = self
            .tables
            .read()
            .map_err(|_| StoreError::Lock("memory store poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> StoreResult<R> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| StoreError::Lock("memory store poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl_repositories!(MemoryStore);

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::*;

    fn session(id: &str, task: &str, attempt: u32) -> Session {
        Session {
            id: id.into(),
            task_id: task.into(),
            status: SessionStatus::Completed,
            attempt_number: attempt,
            provider: "claude".into(),
            model: "sonnet".into(),
            resume_mode: None,
            parent_session_id: None,
            resumed_from: None,
            process_handle: None,
            provider_session_id: None,
            prompt: None,
            summary: None,
            error: None,
            cost_usd: None,
            context_snapshot: vec![],
            skill_snapshot: vec![],
            created_at: now_rfc3339(),
            started_at: None,
            ended_at: None,
        }
    }

    fn diff(id: &str, task: &str, approval: Option<&str>) -> Diff {
        Diff {
            id: id.into(),
            session_id: "ses_1".into(),
            task_id: task.into(),
            tool_invocation_id: format!("tool_{id}"),
            file_path: format!("/repo/{id}.ts").into(),
            kind: DiffKind::Write,
            hunks: vec![],
            full_content: Some("x".into()),
            previous_content: None,
            moved_to: None,
            status: DiffStatus::Pending,
            approval_id: approval.map(String::from),
            created_at: now_rfc3339(),
            applied_at: None,
        }
    }

    #[tokio::test]
    async fn sessions_sorted_by_attempt() {
        let store = MemoryStore::new();
        store.put_session(&session("ses_b", "task_1", 2)).await.unwrap();
        store.put_session(&session("ses_a", "task_1", 1)).await.unwrap();
        store.put_session(&session("ses_c", "task_2", 1)).await.unwrap();
        let list = store.list_sessions_for_task("task_1").await.unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["ses_a", "ses_b"]);
    }

    #[tokio::test]
    async fn diff_update_keeps_insertion_order() {
        let store = MemoryStore::new();
        store.put_diff(&diff("d2", "task_1", None)).await.unwrap();
        store.put_diff(&diff("d1", "task_1", None)).await.unwrap();
        let mut updated = diff("d2", "task_1", Some("apr_1"));
        updated.status = DiffStatus::Approved;
        store.put_diff(&updated).await.unwrap();

        let all = store.list_diffs_for_task("task_1").await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["d2", "d1"]);
        let linked = store.list_diffs_for_approval("apr_1").await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].status, DiffStatus::Approved);
    }

    #[tokio::test]
    async fn pending_approval_lookup_ignores_resolved() {
        let store = MemoryStore::new();
        let mut a = GitCommitApproval {
            id: "apr_1".into(),
            task_id: "task_1".into(),
            project_id: "prj_1".into(),
            session_id: "ses_1".into(),
            attempt_number: 1,
            status: ApprovalStatus::Rejected,
            commit_message: "m".into(),
            files_changed: vec![],
            diff_summary: DiffSummary::default(),
            commit_sha: None,
            created_at: now_rfc3339(),
            updated_at: None,
            resolved_at: None,
        };
        store.put_approval(&a).await.unwrap();
        assert!(store.find_pending_approval("task_1").await.unwrap().is_none());

        a.id = "apr_2".into();
        a.status = ApprovalStatus::Pending;
        store.put_approval(&a).await.unwrap();
        let found = store.find_pending_approval("task_1").await.unwrap().unwrap();
        assert_eq!(found.id, "apr_2");
        assert_eq!(
            store
                .list_approvals(Some(ApprovalStatus::Pending))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.list_approvals(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn messages_filtered_by_session() {
        let store = MemoryStore::new();
        for (i, ses) in ["ses_1", "ses_2", "ses_1"].iter().enumerate() {
            store
                .append_message(&Message {
                    id: format!("msg_{i}"),
                    session_id: ses.to_string(),
                    role: MessageRole::User,
                    content: format!("m{i}"),
                    created_at: now_rfc3339(),
                })
                .await
                .unwrap();
        }
        let msgs = store.list_messages("ses_1").await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "m2");
    }
}
