use anyhow::{Context, Result};
use warden_core::{MessageRepository, SessionRepository};
use warden_store::JsonFileStore;

/// `warden sessions [--task <id>]`
pub async fn list(store: &JsonFileStore, task_id: Option<&str>) -> Result<()> {
    let sessions = match task_id {
        Some(task_id) => store.list_sessions_for_task(task_id).await?,
        None => store.list_sessions().await?,
    };
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for s in &sessions {
        let cost = s
            .cost_usd
            .map(|c| format!("${c:.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  #{:<2} {:<10} {:<8} {:<24} {}",
            s.id,
            s.task_id,
            s.attempt_number,
            format!("{:?}", s.status),
            cost,
            format!("{}/{}", s.provider, s.model),
            s.created_at
        );
    }
    Ok(())
}

/// `warden session show <id>`: status, summary and the message log.
pub async fn show(store: &JsonFileStore, session_id: &str) -> Result<()> {
    let session = store
        .get_session(session_id)
        .await?
        .with_context(|| format!("session not found: {session_id}"))?;
    println!("Session:  {}", session.id);
    println!("Task:     {}", session.task_id);
    println!("Attempt:  {}", session.attempt_number);
    println!("Status:   {:?}", session.status);
    println!("Provider: {} / {}", session.provider, session.model);
    if let Some(mode) = session.resume_mode {
        println!("Resume:   {mode:?}");
    }
    if let Some(error) = &session.error {
        println!("Error:    {error}");
    }
    if let Some(summary) = &session.summary {
        println!("\n{summary}");
    }

    let messages = store.list_messages(&session.id).await?;
    if !messages.is_empty() {
        println!();
        for m in &messages {
            println!("[{:?}] {}", m.role, m.content);
        }
    }
    Ok(())
}
