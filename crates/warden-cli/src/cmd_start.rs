use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use warden_conductor::adapter::claude::ClaudeProfile;
use warden_conductor::adapter::codex::CodexProfile;
use warden_conductor::session::DiscoveryRoots;
use warden_conductor::{
    spawn_sweeper, BroadcastBus, GitCli, ProviderRouter, SessionOrchestrator, StartRequest,
    SubprocessAdapter,
};
use warden_core::{BusEvent, ProjectRepository, SessionStatus, TaskRepository, WardenConfig};
use warden_store::JsonFileStore;

pub struct StartParams {
    pub request: StartRequest,
    pub quiet: bool,
}

fn router(config: &WardenConfig) -> ProviderRouter {
    ProviderRouter::new()
        .with(Arc::new(SubprocessAdapter::new(
            ClaudeProfile,
            config.provider("claude"),
        )))
        .with(Arc::new(SubprocessAdapter::new(
            CodexProfile,
            config.provider("codex"),
        )))
}

/// `warden start <task>`: run one session to completion, streaming bus
/// events to stdout. Ctrl+C stops the agent.
pub async fn run(store: JsonFileStore, params: StartParams) -> Result<()> {
    let task = store
        .get_task(&params.request.task_id)
        .await?
        .with_context(|| format!("task not found: {}", params.request.task_id))?;
    let project = store
        .get_project(&task.project_id)
        .await?
        .with_context(|| format!("project not found: {}", task.project_id))?;
    let config = warden_store::load_config(Some(&project.path))?;

    let bus = Arc::new(BroadcastBus::new().with_journal(warden_store::event_log_path()));
    let mut events = bus.subscribe();
    let store_root = warden_store::store_root();
    let orchestrator = SessionOrchestrator::new(
        Arc::new(store),
        Arc::new(router(&config)),
        Arc::new(GitCli),
        bus.clone(),
        config.clone(),
    )
    .with_discovery_roots(DiscoveryRoots {
        home: dirs::home_dir(),
        warden_home: Some(store_root.clone()),
    })
    .with_transcripts(store_root.join("transcripts"));

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        orchestrator.pipeline().clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
        Duration::from_secs(config.orphan_max_age_secs),
        cancel.clone(),
    );

    let started = orchestrator.start_session(params.request).await?;
    let session_id = started.session.id.clone();
    println!(
        "Session {session_id} (attempt {}) running on {} / {}",
        started.session.attempt_number, started.session.provider, started.session.model
    );

    let interrupt = CancellationToken::new();
    ctrlc_cancel(interrupt.clone());
    let mut done = tokio::spawn(started.wait());
    let mut stopping = false;
    let finished = loop {
        tokio::select! {
            result = &mut done => break result.context("session driver failed")?,
            _ = interrupt.cancelled(), if !stopping => {
                stopping = true;
                println!("Stopping session {session_id}...");
                if let Err(e) = orchestrator.stop_session(&session_id).await {
                    warn!(session_id = %session_id, error = %e, "stop failed");
                }
            }
            event = events.recv() => match event {
                Ok(event) if !params.quiet => print_event(&event),
                Ok(_) | Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => {}
            },
        }
    };
    // Events published while the session finalized.
    while let Ok(event) = events.try_recv() {
        if !params.quiet {
            print_event(&event);
        }
    }
    cancel.cancel();
    let _ = sweeper.await;

    match finished.status {
        SessionStatus::Completed => {
            println!("Session {} completed.", finished.id);
            if let Some(summary) = &finished.summary {
                println!("\n{summary}");
            }
        }
        status => {
            println!(
                "Session {} ended {status:?}: {}",
                finished.id,
                finished.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if let Some(cost) = finished.cost_usd {
        println!("Cost: ${cost:.2}");
    }
    Ok(())
}

fn print_event(event: &BusEvent) {
    match event {
        BusEvent::DiffCreated {
            file_path, kind, ..
        } => println!("  {kind:?}  {}", file_path.display()),
        BusEvent::SessionStatusChanged { status, .. } => println!("  session {status:?}"),
        BusEvent::ApprovalCreated { approval } | BusEvent::ApprovalUpdated { approval } => {
            println!(
                "  approval {} pending: {} file(s), +{} -{}",
                approval.id,
                approval.files_changed.len(),
                approval.diff_summary.additions,
                approval.diff_summary.deletions
            );
        }
        BusEvent::ApprovalResolved {
            approval_id,
            status,
            commit,
            ..
        } => match commit {
            Some(c) => println!("  approval {approval_id} {status:?} ({})", c.sha),
            None => println!("  approval {approval_id} {status:?}"),
        },
        BusEvent::PermissionRequested { tool_name, .. } => {
            println!("  permission requested for {tool_name} (set permission_mode to bypassPermissions to allow)")
        }
        BusEvent::BranchCreated { branch, .. } => println!("  branch {branch} created"),
        BusEvent::BranchDeleted { branch, .. } => println!("  branch {branch} deleted"),
    }
}

fn ctrlc_cancel(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}
