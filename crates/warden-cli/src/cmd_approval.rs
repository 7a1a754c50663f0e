use anyhow::Result;
use std::sync::Arc;
use warden_conductor::{ApprovalService, BroadcastBus, GitCli};
use warden_core::{ApprovalRepository, ApprovalStatus};
use warden_store::JsonFileStore;

fn service(store: JsonFileStore) -> ApprovalService {
    let bus = BroadcastBus::new().with_journal(warden_store::event_log_path());
    ApprovalService::new(Arc::new(store), Arc::new(GitCli), Arc::new(bus))
}

/// `warden approvals [--all]`
pub async fn list(store: &JsonFileStore, all: bool) -> Result<()> {
    let filter = (!all).then_some(ApprovalStatus::Pending);
    let approvals = store.list_approvals(filter).await?;
    if approvals.is_empty() {
        println!("No approvals.");
        return Ok(());
    }
    for a in &approvals {
        println!(
            "{}  {}  {:<9} {} file(s) +{} -{}  {}",
            a.id,
            a.task_id,
            format!("{:?}", a.status),
            a.diff_summary.files_changed,
            a.diff_summary.additions,
            a.diff_summary.deletions,
            a.commit_message
        );
        for f in &a.diff_summary.files {
            println!("    {:<40} +{} -{}", f.path, f.additions, f.deletions);
        }
    }
    Ok(())
}

/// `warden approve <id> [--message <msg>]`
pub async fn approve(store: JsonFileStore, approval_id: &str, message: Option<&str>) -> Result<()> {
    let approval = service(store).approve(approval_id, message).await?;
    println!(
        "Approved {} -> {}",
        approval.id,
        approval.commit_sha.as_deref().unwrap_or("(no commit)")
    );
    Ok(())
}

/// `warden reject <id> [--discard-untracked]`
pub async fn reject(store: JsonFileStore, approval_id: &str, discard_untracked: bool) -> Result<()> {
    let outcome = service(store).reject(approval_id, discard_untracked).await?;
    println!("Rejected {}", outcome.approval.id);
    for revert in &outcome.reverts {
        match &revert.error {
            None => println!("  reverted  {}", revert.path.display()),
            Some(err) => println!("  FAILED    {}: {err}", revert.path.display()),
        }
    }
    for path in &outcome.discarded {
        println!("  removed   {path}");
    }
    if let Some(err) = &outcome.discard_error {
        println!("  could not discard untracked files: {err}");
    }
    for err in &outcome.store_errors {
        println!("  not recorded: {err}");
    }
    if outcome.is_partial() {
        println!("Some changes could not be reverted or recorded; inspect the working tree.");
    }
    Ok(())
}

/// `warden diff <id>`: unified diff of the approval's files.
pub async fn preview(store: JsonFileStore, approval_id: &str) -> Result<()> {
    let diff = service(store).preview(approval_id).await?;
    if diff.is_empty() {
        println!("(no changes in the working tree)");
    } else {
        print!("{diff}");
    }
    Ok(())
}

/// `warden task branch <task> [--delete]`
pub async fn branch(store: JsonFileStore, task_id: &str, delete: bool) -> Result<()> {
    let approvals = service(store);
    if delete {
        let name = approvals.delete_task_branch(task_id).await?;
        println!("Deleted branch {name}");
    } else {
        let name = approvals.create_task_branch(task_id).await?;
        println!("Created branch {name}");
    }
    Ok(())
}
