use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use warden_core::{new_id, now_rfc3339, ProjectRepository, Task, TaskRepository, TaskStatus};
use warden_store::JsonFileStore;

pub struct TaskParams {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub agent: Option<String>,
    pub context_files: Vec<PathBuf>,
    pub auto_commit: Option<bool>,
    pub permission_mode: Option<String>,
    pub budget_usd: Option<f64>,
}

/// `todo`, `in_progress`, `in_review`, `done`, `cancelled` (dashes accepted).
pub fn parse_status(raw: &str) -> Result<TaskStatus> {
    let normalized = raw.trim().to_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .with_context(|| format!("unknown task status \"{raw}\""))
}

/// `warden task add <project> <title>`
pub async fn add(store: &JsonFileStore, params: TaskParams) -> Result<()> {
    if store.get_project(&params.project_id).await?.is_none() {
        bail!("project not found: {}", params.project_id);
    }
    let task = Task {
        id: new_id("task"),
        project_id: params.project_id,
        title: params.title,
        description: params.description,
        status: TaskStatus::Todo,
        provider: params.provider,
        model: params.model,
        agent_id: params.agent,
        context_files: params.context_files,
        auto_commit: params.auto_commit,
        permission_mode: params.permission_mode,
        allowed_tools: None,
        disallowed_tools: None,
        budget_usd: params.budget_usd,
        fallback_model: None,
        mcp_config_paths: vec![],
        created_at: now_rfc3339(),
    };
    store.put_task(&task).await?;
    println!("{}  {}", task.id, task.title);
    Ok(())
}

/// `warden task status <task> <status>`
pub async fn set_status(store: &JsonFileStore, task_id: &str, status: &str) -> Result<()> {
    let status = parse_status(status)?;
    let mut task = store
        .get_task(task_id)
        .await?
        .with_context(|| format!("task not found: {task_id}"))?;
    task.status = status;
    store.put_task(&task).await?;
    println!("{} is now {status:?}", task.id);
    Ok(())
}

/// `warden task list [--project <id>]`
pub async fn list(store: &JsonFileStore, project_id: Option<&str>) -> Result<()> {
    let tasks = store.list_tasks(project_id).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for t in &tasks {
        println!("{}  {:<12} {}", t.id, format!("{:?}", t.status), t.title);
    }
    Ok(())
}
