use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::*;

/// Every record the store holds. Serialized as one JSON document by
/// [`crate::JsonFileStore`]; held in memory by [`crate::MemoryStore`].
///
/// Diffs and messages keep insertion order, which the approval flow relies
/// on when reverting a batch newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub projects: BTreeMap<ProjectId, Project>,
    pub tasks: BTreeMap<TaskId, Task>,
    pub agents: BTreeMap<AgentId, AgentProfile>,
    pub sessions: BTreeMap<SessionId, Session>,
    pub messages: Vec<Message>,
    pub diffs: Vec<Diff>,
    pub approvals: BTreeMap<ApprovalId, GitCommitApproval>,
}

impl Tables {
    pub fn tasks_for_project(&self, project_id: Option<&str>) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| project_id.map_or(true, |p| t.project_id == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn sessions_for_task(&self, task_id: &str) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.attempt_number
                .cmp(&b.attempt_number)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        out
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.sessions.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn messages_for_session(&self, session_id: &str) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn diff(&self, id: &str) -> Option<Diff> {
        self.diffs.iter().find(|d| d.id == id).cloned()
    }

    /// Insert, or replace in place so creation order survives updates.
    pub fn upsert_diff(&mut self, diff: &Diff) {
        match self.diffs.iter_mut().find(|d| d.id == diff.id) {
            Some(slot) => *slot = diff.clone(),
            None => self.diffs.push(diff.clone()),
        }
    }

    pub fn diffs_where(&self, pred: impl Fn(&Diff) -> bool) -> Vec<Diff> {
        self.diffs.iter().filter(|d| pred(d)).cloned().collect()
    }

    pub fn pending_approval(&self, task_id: &str) -> Option<GitCommitApproval> {
        self.approvals
            .values()
            .filter(|a| a.task_id == task_id && a.status == ApprovalStatus::Pending)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned()
    }

    pub fn approvals_with(&self, status: Option<ApprovalStatus>) -> Vec<GitCommitApproval> {
        let mut out: Vec<GitCommitApproval> = self
            .approvals
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }
}

/// Read/modify access to [`Tables`], implemented by each backend.
pub(crate) trait TableAccess: Send + Sync {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> StoreResult<R>;
    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> StoreResult<R>;
}

/// Implement every repository port on a [`TableAccess`] backend.
macro_rules! impl_repositories {
    ($store:ty) => {
        #[async_trait::async_trait]
        impl warden_core::ProjectRepository for $store {
            async fn get_project(
                &self,
                id: &str,
            ) -> warden_core::StoreResult<Option<warden_core::Project>> {
                self.read(|t| t.projects.get(id).cloned())
            }
            async fn put_project(&self, project: &warden_core::Project) -> warden_core::StoreResult<()> {
                self.write(|t| {
                    t.projects.insert(project.id.clone(), project.clone());
                })
            }
            async fn list_projects(&self) -> warden_core::StoreResult<Vec<warden_core::Project>> {
                self.read(|t| {
                    let mut out: Vec<_> = t.projects.values().cloned().collect();
                    out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                    out
                })
            }
        }

        #[async_trait::async_trait]
        impl warden_core::TaskRepository for $store {
            async fn get_task(&self, id: &str) -> warden_core::StoreResult<Option<warden_core::Task>> {
                self.read(|t| t.tasks.get(id).cloned())
            }
            async fn put_task(&self, task: &warden_core::Task) -> warden_core::StoreResult<()> {
                self.write(|t| {
                    t.tasks.insert(task.id.clone(), task.clone());
                })
            }
            async fn list_tasks(
                &self,
                project_id: Option<&str>,
            ) -> warden_core::StoreResult<Vec<warden_core::Task>> {
                self.read(|t| t.tasks_for_project(project_id))
            }
        }

        #[async_trait::async_trait]
        impl warden_core::AgentRepository for $store {
            async fn get_agent(
                &self,
                id: &str,
            ) -> warden_core::StoreResult<Option<warden_core::AgentProfile>> {
                self.read(|t| t.agents.get(id).cloned())
            }
            async fn put_agent(&self, agent: &warden_core::AgentProfile) -> warden_core::StoreResult<()> {
                self.write(|t| {
                    t.agents.insert(agent.id.clone(), agent.clone());
                })
            }
        }

        #[async_trait::async_trait]
        impl warden_core::SessionRepository for $store {
            async fn get_session(
                &self,
                id: &str,
            ) -> warden_core::StoreResult<Option<warden_core::Session>> {
                self.read(|t| t.sessions.get(id).cloned())
            }
            async fn put_session(&self, session: &warden_core::Session) -> warden_core::StoreResult<()> {
                self.write(|t| {
                    t.sessions.insert(session.id.clone(), session.clone());
                })
            }
            async fn list_sessions_for_task(
                &self,
                task_id: &str,
            ) -> warden_core::StoreResult<Vec<warden_core::Session>> {
                self.read(|t| t.sessions_for_task(task_id))
            }
            async fn list_sessions(&self) -> warden_core::StoreResult<Vec<warden_core::Session>> {
                self.read(|t| t.all_sessions())
            }
        }

        #[async_trait::async_trait]
        impl warden_core::MessageRepository for $store {
            async fn append_message(&self, message: &warden_core::Message) -> warden_core::StoreResult<()> {
                self.write(|t| t.messages.push(message.clone()))
            }
            async fn list_messages(
                &self,
                session_id: &str,
            ) -> warden_core::StoreResult<Vec<warden_core::Message>> {
                self.read(|t| t.messages_for_session(session_id))
            }
        }

        #[async_trait::async_trait]
        impl warden_core::DiffRepository for $store {
            async fn get_diff(&self, id: &str) -> warden_core::StoreResult<Option<warden_core::Diff>> {
                self.read(|t| t.diff(id))
            }
            async fn put_diff(&self, diff: &warden_core::Diff) -> warden_core::StoreResult<()> {
                self.write(|t| t.upsert_diff(diff))
            }
            async fn list_diffs_for_session(
                &self,
                session_id: &str,
            ) -> warden_core::StoreResult<Vec<warden_core::Diff>> {
                self.read(|t| t.diffs_where(|d| d.session_id == session_id))
            }
            async fn list_diffs_for_task(
                &self,
                task_id: &str,
            ) -> warden_core::StoreResult<Vec<warden_core::Diff>> {
                self.read(|t| t.diffs_where(|d| d.task_id == task_id))
            }
            async fn list_diffs_for_approval(
                &self,
                approval_id: &str,
            ) -> warden_core::StoreResult<Vec<warden_core::Diff>> {
                self.read(|t| t.diffs_where(|d| d.approval_id.as_deref() == Some(approval_id)))
            }
        }

        #[async_trait::async_trait]
        impl warden_core::ApprovalRepository for $store {
            async fn get_approval(
                &self,
                id: &str,
            ) -> warden_core::StoreResult<Option<warden_core::GitCommitApproval>> {
                self.read(|t| t.approvals.get(id).cloned())
            }
            async fn put_approval(
                &self,
                approval: &warden_core::GitCommitApproval,
            ) -> warden_core::StoreResult<()> {
                self.write(|t| {
                    t.approvals.insert(approval.id.clone(), approval.clone());
                })
            }
            async fn find_pending_approval(
                &self,
                task_id: &str,
            ) -> warden_core::StoreResult<Option<warden_core::GitCommitApproval>> {
                self.read(|t| t.pending_approval(task_id))
            }
            async fn list_approvals(
                &self,
                status: Option<warden_core::ApprovalStatus>,
            ) -> warden_core::StoreResult<Vec<warden_core::GitCommitApproval>> {
                self.read(|t| t.approvals_with(status))
            }
        }
    };
}

pub(crate) use impl_repositories;
