use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{
    new_id, now_rfc3339, ApprovalRepository, ApprovalStatus, BusEvent, CommitInfo, Diff,
    DiffKind, DiffRepository, DiffStatus, DiffSummary, EventBus, FileChangeSummary,
    GitCommitApproval, Project, ProjectRepository, Session, Store, Task, TaskRepository,
    VersionControl,
};

use super::machine::{transition, transition_diff, ApprovalUpdate};
use super::revert::revert_diff;
use super::ApprovalError;

/// Branch used for a task's work.
pub fn task_branch_name(task_id: &str) -> String {
    format!("warden/{task_id}")
}

/// Outcome of reverting one diff during a rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRevert {
    pub diff_id: String,
    pub path: PathBuf,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RejectOutcome {
    pub approval: GitCommitApproval,
    pub reverts: Vec<FileRevert>,
    /// Untracked paths removed from the working directory.
    pub discarded: Vec<String>,
    pub discard_error: Option<String>,
    /// Diff records that could not be saved as rejected.
    pub store_errors: Vec<String>,
}

impl RejectOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &FileRevert> {
        self.reverts.iter().filter(|r| r.error.is_some())
    }

    /// Some but not all of the cleanup succeeded.
    pub fn is_partial(&self) -> bool {
        self.failures().next().is_some()
            || self.discard_error.is_some()
            || !self.store_errors.is_empty()
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Paths a diff touches, relative to the project root.
fn touched_paths(root: &Path, diff: &Diff) -> Vec<String> {
    let mut paths = vec![relative_path(root, &diff.file_path)];
    if let Some(dest) = &diff.moved_to {
        paths.push(relative_path(root, dest));
    }
    paths
}

fn summarize(root: &Path, diffs: &[Diff]) -> (Vec<String>, DiffSummary) {
    let mut files: BTreeMap<String, FileChangeSummary> = BTreeMap::new();
    for diff in diffs {
        let (added, removed) = diff.line_counts();
        for (i, path) in touched_paths(root, diff).into_iter().enumerate() {
            let entry = files.entry(path.clone()).or_insert_with(|| FileChangeSummary {
                path,
                ..Default::default()
            });
            // A move destination is a new file with the moved content.
            let kind = if i == 0 { diff.kind } else { DiffKind::Write };
            entry.kind = Some(kind);
            if i == 0 {
                entry.additions += added;
                entry.deletions += removed;
            }
        }
    }
    let summary = DiffSummary {
        files_changed: files.len(),
        additions: files.values().map(|f| f.additions).sum(),
        deletions: files.values().map(|f| f.deletions).sum(),
        files: files.values().cloned().collect(),
    };
    (files.into_keys().collect(), summary)
}

fn default_message(task: &Task) -> String {
    if task.description.trim().is_empty() {
        task.title.clone()
    } else {
        format!("{}\n\n{}", task.title, task.description.trim())
    }
}

/// Creates, resolves and auto-commits change batches for tasks.
pub struct ApprovalService {
    store: Arc<dyn Store>,
    vcs: Arc<dyn VersionControl>,
    bus: Arc<dyn EventBus>,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn Store>, vcs: Arc<dyn VersionControl>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, vcs, bus }
    }

    async fn task_and_project(&self, task_id: &str) -> Result<(Task, Project), ApprovalError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ApprovalError::TaskNotFound(task_id.to_string()))?;
        let project = self
            .store
            .get_project(&task.project_id)
            .await?
            .ok_or_else(|| ApprovalError::ProjectNotFound(task.project_id.clone()))?;
        Ok((task, project))
    }

    async fn require_repository(&self, project: &Project) -> Result<(), ApprovalError> {
        if self.vcs.is_repository(&project.path).await {
            Ok(())
        } else {
            Err(ApprovalError::NoVersionControl(project.path.clone()))
        }
    }

    async fn pending(&self, approval_id: &str) -> Result<GitCommitApproval, ApprovalError> {
        let approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved {
                id: approval.id,
                status: approval.status,
            });
        }
        Ok(approval)
    }

    pub async fn get(&self, approval_id: &str) -> Result<GitCommitApproval, ApprovalError> {
        self.store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))
    }

    /// Gather the task's unapplied diffs into its pending approval, creating
    /// one if none is pending. Returns the task's pending approval, if any.
    pub async fn upsert_for_task(
        &self,
        task_id: &str,
        session: &Session,
    ) -> Result<Option<GitCommitApproval>, ApprovalError> {
        let (task, project) = self.task_and_project(task_id).await?;
        let existing = self.store.find_pending_approval(task_id).await?;
        let diffs: Vec<Diff> = self
            .store
            .list_diffs_for_task(task_id)
            .await?
            .into_iter()
            .filter(|d| d.status == DiffStatus::Pending)
            .filter(|d| match (&d.approval_id, &existing) {
                (None, _) => true,
                (Some(id), Some(pending)) => *id == pending.id,
                (Some(_), None) => false,
            })
            .collect();
        if diffs.is_empty() {
            debug!(task_id, "no unapplied diffs; no approval needed");
            return Ok(existing);
        }

        let (files_changed, diff_summary) = summarize(&project.path, &diffs);
        let now = now_rfc3339();
        let (approval, created) = match existing {
            Some(mut approval) => {
                approval.files_changed = files_changed;
                approval.diff_summary = diff_summary;
                approval.commit_message = default_message(&task);
                approval.session_id = session.id.clone();
                approval.attempt_number = session.attempt_number;
                approval.updated_at = Some(now);
                (approval, false)
            }
            None => (
                GitCommitApproval {
                    id: new_id("apr"),
                    task_id: task.id.clone(),
                    project_id: project.id.clone(),
                    session_id: session.id.clone(),
                    attempt_number: session.attempt_number,
                    status: ApprovalStatus::Pending,
                    commit_message: default_message(&task),
                    files_changed,
                    diff_summary,
                    commit_sha: None,
                    created_at: now,
                    updated_at: None,
                    resolved_at: None,
                },
                true,
            ),
        };

        self.store.put_approval(&approval).await?;
        for mut diff in diffs {
            if diff.approval_id.as_deref() != Some(approval.id.as_str()) {
                diff.approval_id = Some(approval.id.clone());
                self.store.put_diff(&diff).await?;
            }
        }

        info!(
            approval_id = %approval.id,
            task_id,
            files = approval.files_changed.len(),
            created,
            "approval awaiting decision"
        );
        self.bus.publish(if created {
            BusEvent::ApprovalCreated {
                approval: approval.clone(),
            }
        } else {
            BusEvent::ApprovalUpdated {
                approval: approval.clone(),
            }
        });
        Ok(Some(approval))
    }

    /// Commit the approval's files and resolve it as approved.
    ///
    /// Store failures before the commit roll the diffs back and leave nothing
    /// changed. Once the commit exists, every remaining record is still
    /// attempted and failures surface as [`ApprovalError::Unrecorded`].
    pub async fn approve(
        &self,
        approval_id: &str,
        message_override: Option<&str>,
    ) -> Result<GitCommitApproval, ApprovalError> {
        let mut approval = self.pending(approval_id).await?;
        let (_, project) = self.task_and_project(&approval.task_id).await?;
        self.require_repository(&project).await?;

        let mut diffs = self.store.list_diffs_for_approval(&approval.id).await?;
        let changed: Vec<String> = self
            .vcs
            .status(&project.path)
            .await?
            .into_iter()
            .map(|s| s.path)
            .collect();
        let paths: Vec<String> = approval
            .files_changed
            .iter()
            .filter(|f| changed.contains(f))
            .cloned()
            .collect();
        if paths.is_empty() {
            // Diffs only reach approved inside this method, so a clean tree
            // means an earlier call committed but could not record it.
            let committed = !diffs.is_empty()
                && diffs
                    .iter()
                    .all(|d| matches!(d.status, DiffStatus::Approved | DiffStatus::Applied));
            if committed {
                return self.record_earlier_commit(approval, diffs, &project).await;
            }
            return Err(ApprovalError::NoChangesToCommit(approval.id));
        }

        for i in 0..diffs.len() {
            if !transition_diff(&mut diffs[i], DiffStatus::Approved) {
                continue;
            }
            if let Err(e) = self.store.put_diff(&diffs[i]).await {
                self.restore_pending(&mut diffs[..i]).await;
                return Err(e.into());
            }
        }

        let message = message_override
            .map(str::to_string)
            .unwrap_or_else(|| approval.commit_message.clone());
        let commit = match self.vcs.commit_paths(&project.path, &paths, &message).await {
            Ok(commit) => commit,
            Err(e) => {
                self.restore_pending(&mut diffs).await;
                return Err(e.into());
            }
        };

        let mut failures = self.apply_diffs(&mut diffs).await;
        transition(
            &mut approval,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            Some(ApprovalUpdate {
                commit_sha: Some(commit.sha.clone()),
                commit_message: Some(message),
                ..ApprovalUpdate::resolved_now()
            }),
        )?;
        self.resolve(&approval, Some(commit.clone()), &mut failures)
            .await;
        info!(approval_id, sha = %commit.sha, files = commit.files.len(), "approval committed");
        if failures.is_empty() {
            Ok(approval)
        } else {
            Err(ApprovalError::Unrecorded {
                approval_id: approval.id,
                status: ApprovalStatus::Approved,
                commit_sha: Some(commit.sha),
                reverted: vec![],
                failures,
            })
        }
    }

    async fn record_earlier_commit(
        &self,
        mut approval: GitCommitApproval,
        mut diffs: Vec<Diff>,
        project: &Project,
    ) -> Result<GitCommitApproval, ApprovalError> {
        let sha = self.vcs.head(&project.path).await?;
        warn!(approval_id = %approval.id, sha = ?sha, "recording approval committed by an earlier attempt");
        for diff in &mut diffs {
            transition_diff(diff, DiffStatus::Approved);
        }
        let mut failures = self.apply_diffs(&mut diffs).await;
        transition(
            &mut approval,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            Some(ApprovalUpdate {
                commit_sha: sha.clone(),
                ..ApprovalUpdate::resolved_now()
            }),
        )?;
        let commit = sha.map(|sha| CommitInfo {
            sha,
            message: approval.commit_message.clone(),
            files: approval.files_changed.clone(),
        });
        self.resolve(&approval, commit, &mut failures).await;
        if failures.is_empty() {
            Ok(approval)
        } else {
            Err(ApprovalError::Unrecorded {
                approval_id: approval.id,
                status: ApprovalStatus::Approved,
                commit_sha: approval.commit_sha,
                reverted: vec![],
                failures,
            })
        }
    }

    /// Best-effort return of approved diffs to pending after a failed approve.
    async fn restore_pending(&self, diffs: &mut [Diff]) {
        for diff in diffs {
            if transition_diff(diff, DiffStatus::Pending) {
                if let Err(e) = self.store.put_diff(diff).await {
                    warn!(diff_id = %diff.id, error = %e, "could not restore diff to pending");
                }
            }
        }
    }

    /// Mark committed diffs applied; returns the records that failed to save.
    async fn apply_diffs(&self, diffs: &mut [Diff]) -> Vec<String> {
        let mut failures = Vec::new();
        for diff in diffs {
            if transition_diff(diff, DiffStatus::Applied) {
                if let Err(e) = self.store.put_diff(diff).await {
                    warn!(diff_id = %diff.id, error = %e, "could not record applied diff");
                    failures.push(format!("diff {}: {e}", diff.id));
                }
            }
        }
        failures
    }

    /// Persist a resolved approval and announce it once it is saved.
    async fn resolve(
        &self,
        approval: &GitCommitApproval,
        commit: Option<CommitInfo>,
        failures: &mut Vec<String>,
    ) {
        if let Err(e) = self.store.put_approval(approval).await {
            warn!(approval_id = %approval.id, error = %e, "could not record resolution");
            failures.push(format!("approval {}: {e}", approval.id));
            return;
        }
        self.bus.publish(BusEvent::ApprovalResolved {
            approval_id: approval.id.clone(),
            task_id: approval.task_id.clone(),
            status: approval.status,
            commit,
        });
    }

    /// Revert the approval's diffs and resolve it as rejected. Revert and
    /// store failures are collected in the outcome; the approval is rejected
    /// regardless, unless its own record cannot be saved.
    pub async fn reject(
        &self,
        approval_id: &str,
        discard_untracked: bool,
    ) -> Result<RejectOutcome, ApprovalError> {
        let mut approval = self.pending(approval_id).await?;

        let mut diffs = self.store.list_diffs_for_approval(&approval.id).await?;
        let mut reverts = Vec::with_capacity(diffs.len());
        let mut store_errors = Vec::new();
        // Newest first, so stacked edits to one file unwind in order.
        for diff in diffs.iter_mut().rev() {
            let error = match revert_diff(diff) {
                Ok(()) => None,
                Err(e) => {
                    warn!(approval_id, path = %diff.file_path.display(), error = %e, "revert failed");
                    Some(e.to_string())
                }
            };
            reverts.push(FileRevert {
                diff_id: diff.id.clone(),
                path: diff.file_path.clone(),
                error,
            });
            if transition_diff(diff, DiffStatus::Rejected) {
                if let Err(e) = self.store.put_diff(diff).await {
                    warn!(approval_id, diff_id = %diff.id, error = %e, "could not record rejected diff");
                    store_errors.push(format!("diff {}: {e}", diff.id));
                }
            }
        }

        let mut discarded = Vec::new();
        let mut discard_error = None;
        if discard_untracked {
            match self.discard_untracked(&approval.task_id).await {
                Ok(paths) => discarded = paths,
                Err(e) => {
                    warn!(approval_id, error = %e, "could not discard untracked files");
                    discard_error = Some(e.to_string());
                }
            }
        }

        transition(
            &mut approval,
            ApprovalStatus::Pending,
            ApprovalStatus::Rejected,
            Some(ApprovalUpdate::resolved_now()),
        )?;
        let mut failures = Vec::new();
        self.resolve(&approval, None, &mut failures).await;
        if !failures.is_empty() {
            store_errors.extend(failures);
            return Err(ApprovalError::Unrecorded {
                approval_id: approval.id,
                status: ApprovalStatus::Rejected,
                commit_sha: None,
                reverted: reverts
                    .into_iter()
                    .filter(|r| r.error.is_none())
                    .map(|r| r.path)
                    .collect(),
                failures: store_errors,
            });
        }

        info!(approval_id, reverted = reverts.len(), "approval rejected");
        Ok(RejectOutcome {
            approval,
            reverts,
            discarded,
            discard_error,
            store_errors,
        })
    }

    async fn discard_untracked(&self, task_id: &str) -> Result<Vec<String>, ApprovalError> {
        let (_, project) = self.task_and_project(task_id).await?;
        self.require_repository(&project).await?;
        Ok(self.vcs.discard_untracked(&project.path).await?)
    }

    /// Commit one confirmed diff on its own, bypassing approval.
    pub async fn auto_commit(&self, diff: &Diff) -> Result<CommitInfo, ApprovalError> {
        let (_, project) = self.task_and_project(&diff.task_id).await?;
        self.require_repository(&project).await?;
        let paths = touched_paths(&project.path, diff);
        let message = format!("warden: {}", paths.join(", "));
        let commit = self
            .vcs
            .commit_paths(&project.path, &paths, &message)
            .await?;

        let mut diff = diff.clone();
        transition_diff(&mut diff, DiffStatus::Approved);
        transition_diff(&mut diff, DiffStatus::Applied);
        self.store.put_diff(&diff).await?;
        info!(diff_id = %diff.id, sha = %commit.sha, "auto-committed diff");
        Ok(commit)
    }

    pub async fn create_task_branch(&self, task_id: &str) -> Result<String, ApprovalError> {
        let (_, project) = self.task_and_project(task_id).await?;
        self.require_repository(&project).await?;
        let branch = task_branch_name(task_id);
        self.vcs.create_branch(&project.path, &branch).await?;
        self.bus.publish(BusEvent::BranchCreated {
            task_id: task_id.to_string(),
            branch: branch.clone(),
        });
        Ok(branch)
    }

    pub async fn delete_task_branch(&self, task_id: &str) -> Result<String, ApprovalError> {
        let (_, project) = self.task_and_project(task_id).await?;
        self.require_repository(&project).await?;
        let branch = task_branch_name(task_id);
        self.vcs.delete_branch(&project.path, &branch).await?;
        self.bus.publish(BusEvent::BranchDeleted {
            task_id: task_id.to_string(),
            branch: branch.clone(),
        });
        Ok(branch)
    }

    /// Unified diff of the approval's files in the working tree.
    pub async fn preview(&self, approval_id: &str) -> Result<String, ApprovalError> {
        let approval = self.get(approval_id).await?;
        let (_, project) = self.task_and_project(&approval.task_id).await?;
        self.require_repository(&project).await?;
        Ok(self.vcs.diff(&project.path, &approval.files_changed).await?)
    }
}
