//! System and initial prompt assembly.

use std::fmt::Write as _;
use std::path::PathBuf;
use warden_core::{AgentProfile, ResumeMode, Session, Task};

use super::discovery::Skill;

/// Project prompt overrides the global one; the agent role and the
/// summaries of earlier attempts follow it.
pub fn system_prompt(
    global: Option<&str>,
    project: Option<&str>,
    agent: Option<&AgentProfile>,
    prior: &[Session],
    summary_limit: usize,
) -> Option<String> {
    let mut sections: Vec<String> = Vec::new();
    if let Some(base) = project.or(global).filter(|s| !s.trim().is_empty()) {
        sections.push(base.trim().to_string());
    }
    if let Some(agent) = agent.filter(|a| !a.role_description.trim().is_empty()) {
        sections.push(format!(
            "You are acting as {}.\n{}",
            agent.name,
            agent.role_description.trim()
        ));
    }
    if let Some(summaries) = prior_summaries(prior, summary_limit) {
        sections.push(summaries);
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

fn prior_summaries(prior: &[Session], limit: usize) -> Option<String> {
    let with_summary: Vec<&Session> = prior
        .iter()
        .filter(|s| s.status.is_terminal())
        .filter(|s| s.summary.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .collect();
    if with_summary.is_empty() || limit == 0 {
        return None;
    }
    let start = with_summary.len().saturating_sub(limit);
    let mut out = String::from("Previous attempts on this task:");
    for session in &with_summary[start..] {
        let status = format!("{:?}", session.status).to_lowercase();
        let _ = write!(
            out,
            "\n- Attempt {} ({status}): {}",
            session.attempt_number,
            session.summary.as_deref().unwrap_or_default().trim()
        );
    }
    Some(out)
}

/// Prompt delivered as the first user message.
///
/// An explicit prompt always wins. Retry and fork reuse the target's prompt
/// verbatim; renew continues the conversation and only mentions what is new.
pub fn initial_prompt(
    explicit: Option<&str>,
    mode: Option<ResumeMode>,
    target: Option<&Session>,
    task: &Task,
    skills: &[Skill],
) -> String {
    if let Some(prompt) = explicit.filter(|p| !p.trim().is_empty()) {
        return prompt.to_string();
    }
    match (mode, target) {
        (Some(ResumeMode::Retry | ResumeMode::Fork), Some(target)) => {
            if let Some(prompt) = target.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
                return prompt.to_string();
            }
            synthesize(task, skills)
        }
        (Some(ResumeMode::Renew), Some(target)) => renewal(task, target, skills),
        _ => synthesize(task, skills),
    }
}

/// Title, description, context files and skills.
pub fn synthesize(task: &Task, skills: &[Skill]) -> String {
    let mut out = task.title.trim().to_string();
    if !task.description.trim().is_empty() {
        out.push_str("\n\n");
        out.push_str(task.description.trim());
    }
    let skill_refs: Vec<&Skill> = skills.iter().collect();
    push_references(&mut out, &task.context_files, &skill_refs);
    out
}

fn renewal(task: &Task, target: &Session, skills: &[Skill]) -> String {
    let mut out = format!("Continue working on: {}", task.title.trim());
    let new_files: Vec<PathBuf> = task
        .context_files
        .iter()
        .filter(|f| !target.context_snapshot.contains(f))
        .cloned()
        .collect();
    let new_skills: Vec<&Skill> = skills
        .iter()
        .filter(|s| !target.skill_snapshot.contains(&s.name))
        .collect();
    push_references(&mut out, &new_files, &new_skills);
    out
}

fn push_references(out: &mut String, files: &[PathBuf], skills: &[&Skill]) {
    if !files.is_empty() {
        out.push_str("\n\nContext files:");
        for file in files {
            let _ = write!(out, "\n- {}", file.display());
        }
    }
    if !skills.is_empty() {
        out.push_str("\n\nAvailable skills:");
        for skill in skills {
            if skill.description.is_empty() {
                let _ = write!(out, "\n- {} ({})", skill.name, skill.path.display());
            } else {
                let _ = write!(
                    out,
                    "\n- {}: {} ({})",
                    skill.name,
                    skill.description,
                    skill.path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{SessionStatus, TaskStatus};

    fn task() -> Task {
        Task {
            id: "task_1".into(),
            project_id: "prj_1".into(),
            title: "Fix login".into(),
            description: "Users cannot log in.".into(),
            status: TaskStatus::InProgress,
            provider: None,
            model: None,
            agent_id: None,
            context_files: vec![PathBuf::from("src/auth.ts")],
            auto_commit: None,
            permission_mode: None,
            allowed_tools: None,
            disallowed_tools: None,
            budget_usd: None,
            fallback_model: None,
            mcp_config_paths: vec![],
            created_at: String::new(),
        }
    }

    fn session(attempt: u32, prompt: Option<&str>, summary: Option<&str>) -> Session {
        Session {
            id: format!("ses_{attempt}"),
            task_id: "task_1".into(),
            status: SessionStatus::Completed,
            attempt_number: attempt,
            provider: "claude".into(),
            model: "sonnet".into(),
            resume_mode: None,
            parent_session_id: None,
            resumed_from: None,
            process_handle: None,
            provider_session_id: Some(format!("prov-{attempt}")),
            prompt: prompt.map(String::from),
            summary: summary.map(String::from),
            error: None,
            cost_usd: None,
            context_snapshot: vec![PathBuf::from("src/auth.ts")],
            skill_snapshot: vec!["deploy".into()],
            created_at: String::new(),
            started_at: None,
            ended_at: None,
        }
    }

    fn skill(name: &str) -> Skill {
        Skill {
            name: name.into(),
            description: format!("{name} things"),
            path: PathBuf::from(format!("/skills/{name}/SKILL.md")),
            source: "project",
        }
    }

    #[test]
    fn project_prompt_overrides_global() {
        let prompt = system_prompt(Some("global"), Some("project"), None, &[], 3).unwrap();
        assert_eq!(prompt, "project");
        assert_eq!(system_prompt(Some("global"), None, None, &[], 3).unwrap(), "global");
        assert!(system_prompt(None, None, None, &[], 3).is_none());
    }

    #[test]
    fn role_and_recent_summaries_are_appended() {
        let agent = AgentProfile {
            id: "agt_1".into(),
            name: "Reviewer".into(),
            role_description: "Review carefully.".into(),
            allowed_tools: None,
            disallowed_tools: None,
            permission_mode: None,
            model: None,
        };
        let prior = vec![
            session(1, None, Some("first")),
            session(2, None, None),
            session(3, None, Some("third")),
            session(4, None, Some("fourth")),
        ];
        let prompt = system_prompt(Some("base"), None, Some(&agent), &prior, 2).unwrap();
        assert!(prompt.starts_with("base\n\nYou are acting as Reviewer.\nReview carefully."));
        assert!(prompt.contains("- Attempt 3 (completed): third"));
        assert!(prompt.contains("- Attempt 4 (completed): fourth"));
        assert!(!prompt.contains("first"));
    }

    #[test]
    fn explicit_prompt_wins() {
        let prior = session(1, Some("old prompt"), None);
        let prompt = initial_prompt(
            Some("do this"),
            Some(ResumeMode::Retry),
            Some(&prior),
            &task(),
            &[],
        );
        assert_eq!(prompt, "do this");
    }

    #[test]
    fn retry_reuses_prior_prompt_verbatim() {
        let prior = session(1, Some("  exact\nprompt  "), None);
        let prompt = initial_prompt(None, Some(ResumeMode::Retry), Some(&prior), &task(), &[]);
        assert_eq!(prompt, "  exact\nprompt  ");
    }

    #[test]
    fn retry_without_prior_prompt_synthesizes() {
        let prior = session(1, None, None);
        let prompt = initial_prompt(None, Some(ResumeMode::Retry), Some(&prior), &task(), &[]);
        assert!(prompt.starts_with("Fix login\n\nUsers cannot log in."));
        assert!(prompt.contains("Context files:\n- src/auth.ts"));
    }

    #[test]
    fn synthesized_prompt_lists_skills() {
        let prompt = initial_prompt(None, None, None, &task(), &[skill("deploy")]);
        assert!(prompt.ends_with(
            "Available skills:\n- deploy: deploy things (/skills/deploy/SKILL.md)"
        ));
    }

    #[test]
    fn renew_mentions_only_new_references() {
        let mut t = task();
        t.context_files.push(PathBuf::from("src/session.ts"));
        let prior = session(1, Some("old"), None);
        let prompt = initial_prompt(
            None,
            Some(ResumeMode::Renew),
            Some(&prior),
            &t,
            &[skill("deploy"), skill("lint")],
        );
        assert!(prompt.starts_with("Continue working on: Fix login"));
        assert!(prompt.contains("- src/session.ts"));
        assert!(!prompt.contains("src/auth.ts"));
        assert!(prompt.contains("- lint:"));
        assert!(!prompt.contains("- deploy:"));
    }
}
