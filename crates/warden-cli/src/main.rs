mod cmd_approval;
mod cmd_config;
mod cmd_project;
mod cmd_session;
mod cmd_start;
mod cmd_task;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd_config::ConfigCmd;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warden_conductor::StartRequest;
use warden_core::ResumeMode;
use warden_store::JsonFileStore;

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Supervise coding agents and gate their changes behind commit approvals"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register and list projects
    Project {
        #[command(subcommand)]
        cmd: ProjectCmd,
    },
    /// Create tasks and move them through their lifecycle
    Task {
        #[command(subcommand)]
        cmd: TaskCmd,
    },
    /// Start an agent session for an in-progress task
    Start {
        /// Task ID
        task: String,
        /// Provider (claude, codex); defaults to the task's or the config's
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Initial prompt; synthesized from the task when omitted
        #[arg(long)]
        prompt: Option<String>,
        /// Continue from a prior session: renew, retry or fork
        #[arg(long)]
        resume: Option<String>,
        /// Prior session to continue from (defaults to the latest)
        #[arg(long)]
        from: Option<String>,
        /// Agent profile ID
        #[arg(long)]
        agent: Option<String>,
        /// Only print the final result
        #[arg(long, short)]
        quiet: bool,
    },
    /// List sessions
    Sessions {
        /// Only sessions of this task
        #[arg(long)]
        task: Option<String>,
    },
    /// Show one session with its messages
    Session {
        /// Session ID
        id: String,
    },
    /// List approvals (pending only unless --all)
    Approvals {
        #[arg(long)]
        all: bool,
    },
    /// Commit a pending approval's files
    Approve {
        /// Approval ID
        id: String,
        /// Commit message (defaults to the synthesized one)
        #[arg(long, short)]
        message: Option<String>,
    },
    /// Revert a pending approval's files
    Reject {
        /// Approval ID
        id: String,
        /// Also remove untracked files from the working tree
        #[arg(long)]
        discard_untracked: bool,
    },
    /// Show the working-tree diff of an approval's files
    Diff {
        /// Approval ID
        id: String,
    },
    /// Read or write config (global, or <project>/.warden/config.json)
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ProjectCmd {
    /// Register a project directory
    Add {
        name: String,
        path: PathBuf,
        /// Project system prompt (overrides the global one)
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        auto_commit: Option<bool>,
    },
    /// List projects
    List,
}

#[derive(Subcommand)]
enum TaskCmd {
    /// Create a task (status: todo)
    Add {
        /// Project ID
        project: String,
        title: String,
        #[arg(long, short, default_value = "")]
        description: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Agent profile ID
        #[arg(long)]
        agent: Option<String>,
        /// Context file (repeatable)
        #[arg(long = "context")]
        context_files: Vec<PathBuf>,
        #[arg(long)]
        auto_commit: Option<bool>,
        #[arg(long)]
        permission_mode: Option<String>,
        #[arg(long)]
        budget: Option<f64>,
    },
    /// Set a task's status (todo, in-progress, in-review, done, cancelled)
    Status { task: String, status: String },
    /// List tasks
    List {
        #[arg(long)]
        project: Option<String>,
    },
    /// Create (or with --delete, remove) the task's git branch
    Branch {
        task: String,
        #[arg(long)]
        delete: bool,
    },
}

fn parse_resume_mode(raw: &str) -> anyhow::Result<ResumeMode> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
        .with_context(|| format!("unknown resume mode \"{raw}\" (expected renew, retry or fork)"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.cmd {
        Command::Config { cmd } => cmd_config::run(cmd),
        cmd => {
            let store = JsonFileStore::default_location();
            tokio::runtime::Runtime::new()?.block_on(dispatch(cmd, store))
        }
    }
}

async fn dispatch(cmd: Command, store: JsonFileStore) -> anyhow::Result<()> {
    match cmd {
        Command::Project { cmd } => match cmd {
            ProjectCmd::Add {
                name,
                path,
                system_prompt,
                auto_commit,
            } => cmd_project::add(&store, &name, &path, system_prompt, auto_commit).await,
            ProjectCmd::List => cmd_project::list(&store).await,
        },
        Command::Task { cmd } => match cmd {
            TaskCmd::Add {
                project,
                title,
                description,
                provider,
                model,
                agent,
                context_files,
                auto_commit,
                permission_mode,
                budget,
            } => {
                cmd_task::add(
                    &store,
                    cmd_task::TaskParams {
                        project_id: project,
                        title,
                        description,
                        provider,
                        model,
                        agent,
                        context_files,
                        auto_commit,
                        permission_mode,
                        budget_usd: budget,
                    },
                )
                .await
            }
            TaskCmd::Status { task, status } => cmd_task::set_status(&store, &task, &status).await,
            TaskCmd::List { project } => cmd_task::list(&store, project.as_deref()).await,
            TaskCmd::Branch { task, delete } => cmd_approval::branch(store, &task, delete).await,
        },
        Command::Start {
            task,
            provider,
            model,
            prompt,
            resume,
            from,
            agent,
            quiet,
        } => {
            let resume_mode = resume.as_deref().map(parse_resume_mode).transpose()?;
            let request = StartRequest {
                task_id: task,
                provider,
                model,
                prompt,
                resume_mode,
                resume_from: from,
                agent_id: agent,
            };
            cmd_start::run(store, cmd_start::StartParams { request, quiet }).await
        }
        Command::Sessions { task } => cmd_session::list(&store, task.as_deref()).await,
        Command::Session { id } => cmd_session::show(&store, &id).await,
        Command::Approvals { all } => cmd_approval::list(&store, all).await,
        Command::Approve { id, message } => {
            cmd_approval::approve(store, &id, message.as_deref()).await
        }
        Command::Reject {
            id,
            discard_untracked,
        } => cmd_approval::reject(store, &id, discard_untracked).await,
        Command::Diff { id } => cmd_approval::preview(store, &id).await,
        Command::Config { cmd } => cmd_config::run(cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resume_modes() {
        assert_eq!(parse_resume_mode("Retry").unwrap(), ResumeMode::Retry);
        assert_eq!(parse_resume_mode("fork").unwrap(), ResumeMode::Fork);
        assert!(parse_resume_mode("again").is_err());
    }

    #[test]
    fn start_flags_parse() {
        let cli = Cli::try_parse_from([
            "warden", "start", "task_1", "--resume", "renew", "--from", "ses_1", "-q",
        ])
        .unwrap();
        match cli.cmd {
            Command::Start {
                task,
                resume,
                from,
                quiet,
                ..
            } => {
                assert_eq!(task, "task_1");
                assert_eq!(resume.as_deref(), Some("renew"));
                assert_eq!(from.as_deref(), Some("ses_1"));
                assert!(quiet);
            }
            _ => panic!("expected start"),
        }
    }
}
