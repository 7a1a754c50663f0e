use anyhow::{Context, Result};
use std::path::Path;
use warden_core::{new_id, now_rfc3339, Project, ProjectRepository};
use warden_store::JsonFileStore;

/// `warden project add <name> <path>`
pub async fn add(
    store: &JsonFileStore,
    name: &str,
    path: &Path,
    system_prompt: Option<String>,
    auto_commit: Option<bool>,
) -> Result<()> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("project path {} is not accessible", path.display()))?;
    let project = Project {
        id: new_id("prj"),
        name: name.to_string(),
        path,
        system_prompt,
        auto_commit,
        created_at: now_rfc3339(),
    };
    store.put_project(&project).await?;
    println!("{}  {}  {}", project.id, project.name, project.path.display());
    Ok(())
}

/// `warden project list`
pub async fn list(store: &JsonFileStore) -> Result<()> {
    let projects = store.list_projects().await?;
    if projects.is_empty() {
        println!("No projects. Add one with `warden project add <name> <path>`.");
        return Ok(());
    }
    for p in &projects {
        println!("{}  {:<20} {}", p.id, p.name, p.path.display());
    }
    Ok(())
}
