use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::{
    new_id, now_rfc3339, AgentProfile, AgentRepository, BusEvent, EventBus, Message,
    MessageRepository, MessageRole, ProjectRepository, ResumeMode, Session, SessionRepository,
    SessionStatus, Store, StoreError, Task, TaskRepository, TaskStatus, VersionControl,
    WardenConfig,
};

use super::discovery::{discover_skills, discover_sub_agents, resolvers, DiscoveryRoots};
use super::driver::{self, DriverContext};
use super::prompt::{initial_prompt, system_prompt};
use crate::adapter::{AdapterError, ProcessAdapter, ProcessExit, SpawnConfig};
use crate::approval::ApprovalService;
use crate::pipeline::{OperationContext, PendingOperationPipeline};
use crate::router::ProviderRouter;

#[derive(Debug, thiserror::Error)]
pub enum SessionStartError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("agent profile not found: {0}")]
    AgentNotFound(String),
    #[error("working directory {0} is not usable")]
    WorkingDirectoryUnavailable(PathBuf),
    #[error("task {task_id} is {status:?}, not in progress")]
    TaskNotInProgress { task_id: String, status: TaskStatus },
    #[error("task {task_id} already has a running session ({session_id})")]
    AlreadyRunning { task_id: String, session_id: String },
    #[error("task {0} has no prior session with a provider session id to resume")]
    NoResumableSession(String),
    #[error("session {0} is not a prior session of this task")]
    ResumeTargetNotFound(String),
    #[error("no provider configured; set one on the request, the task, or default_provider")]
    MissingProvider,
    #[error("no model configured; set one on the request, the task, or default_model")]
    MissingModel,
    #[error("no adapter registered for provider \"{0}\"")]
    UnknownProvider(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} is not running")]
    NotRunning(String),
    #[error("spawn failed: {0}")]
    Spawn(#[source] AdapterError),
    #[error(transparent)]
    Process(AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionStartError {
    /// Precondition failures are permanent; spawn and storage failures may not be.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionStartError::Spawn(e) | SessionStartError::Process(e) => e.is_retryable(),
            SessionStartError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// What to start. Everything but the task is optional and falls back to
/// the task, its agent profile and the global config.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub task_id: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub resume_mode: Option<ResumeMode>,
    /// Prior session to continue from; defaults to the latest one with a
    /// provider session id. Implies [`ResumeMode::Renew`] when no mode is set.
    pub resume_from: Option<String>,
    pub agent_id: Option<String>,
}

impl StartRequest {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ResumeMode) -> Self {
        self.resume_mode = Some(mode);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// A spawned, supervised session.
#[derive(Debug)]
pub struct StartedSession {
    /// The session as persisted right after spawn.
    pub session: Session,
    done: JoinHandle<Session>,
}

impl StartedSession {
    /// Wait for the process to exit and the session to be finalized.
    pub async fn wait(self) -> Session {
        let StartedSession { session, done } = self;
        match done.await {
            Ok(finished) => finished,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "session driver panicked");
                session
            }
        }
    }
}

/// Starts agent sessions for tasks and supervises them to completion.
pub struct SessionOrchestrator {
    store: Arc<dyn Store>,
    router: Arc<ProviderRouter>,
    pipeline: Arc<PendingOperationPipeline>,
    approvals: Arc<ApprovalService>,
    bus: Arc<dyn EventBus>,
    config: WardenConfig,
    roots: DiscoveryRoots,
    transcript_dir: Option<PathBuf>,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        router: Arc<ProviderRouter>,
        vcs: Arc<dyn VersionControl>,
        bus: Arc<dyn EventBus>,
        config: WardenConfig,
    ) -> Self {
        let approvals = Arc::new(ApprovalService::new(store.clone(), vcs, bus.clone()));
        Self {
            store,
            router,
            pipeline: Arc::new(PendingOperationPipeline::new()),
            approvals,
            bus,
            config,
            roots: DiscoveryRoots::default(),
            transcript_dir: None,
        }
    }

    pub fn with_discovery_roots(mut self, roots: DiscoveryRoots) -> Self {
        self.roots = roots;
        self
    }

    /// Keep raw provider output under `dir/<session_id>.jsonl`.
    pub fn with_transcripts(mut self, dir: PathBuf) -> Self {
        self.transcript_dir = Some(dir);
        self
    }

    pub fn pipeline(&self) -> &Arc<PendingOperationPipeline> {
        &self.pipeline
    }

    pub fn approvals(&self) -> &Arc<ApprovalService> {
        &self.approvals
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub async fn start_session(
        &self,
        request: StartRequest,
    ) -> Result<StartedSession, SessionStartError> {
        // ── Preconditions ──
        let task = self
            .store
            .get_task(&request.task_id)
            .await?
            .ok_or_else(|| SessionStartError::TaskNotFound(request.task_id.clone()))?;
        let project = self
            .store
            .get_project(&task.project_id)
            .await?
            .ok_or_else(|| SessionStartError::ProjectNotFound(task.project_id.clone()))?;
        let working_dir = working_dir(&task, &project.path)?;
        if task.status != TaskStatus::InProgress {
            return Err(SessionStartError::TaskNotInProgress {
                task_id: task.id.clone(),
                status: task.status,
            });
        }
        let prior = self.store.list_sessions_for_task(&task.id).await?;
        let mode = request
            .resume_mode
            .or(request.resume_from.as_ref().map(|_| ResumeMode::Renew));
        if mode != Some(ResumeMode::Fork) {
            if let Some(running) = prior.iter().find(|s| s.status.is_active()) {
                return Err(SessionStartError::AlreadyRunning {
                    task_id: task.id.clone(),
                    session_id: running.id.clone(),
                });
            }
        }

        // ── Resolution ──
        let target = resume_target(&request, mode, &prior)?;
        let continues = matches!(mode, Some(ResumeMode::Renew | ResumeMode::Fork));
        let resume_session_id = if continues {
            Some(
                target
                    .and_then(|t| t.provider_session_id.clone())
                    .ok_or_else(|| SessionStartError::NoResumableSession(task.id.clone()))?,
            )
        } else {
            None
        };

        let provider = request
            .provider
            .clone()
            .or_else(|| target.filter(|_| continues).map(|t| t.provider.clone()))
            .or_else(|| task.provider.clone())
            .or_else(|| self.config.default_provider.clone())
            .ok_or(SessionStartError::MissingProvider)?;
        if !self.router.has_provider(&provider) {
            return Err(SessionStartError::UnknownProvider(provider));
        }

        let agent = self.agent_for(&request, &task).await?;
        let model = request
            .model
            .clone()
            .or_else(|| task.model.clone())
            .or_else(|| agent.as_ref().and_then(|a| a.model.clone()))
            .or_else(|| self.config.default_model.clone())
            .ok_or(SessionStartError::MissingModel)?;

        let found = resolvers(&project.path, &provider, &self.roots);
        let skills = discover_skills(&found);
        let sub_agents = discover_sub_agents(&found);

        let system = system_prompt(
            self.config.system_prompt.as_deref(),
            project.system_prompt.as_deref(),
            agent.as_ref(),
            &prior,
            self.config.summary_limit,
        );
        let prompt = initial_prompt(request.prompt.as_deref(), mode, target, &task, &skills);

        let permission_mode = task
            .permission_mode
            .clone()
            .or_else(|| agent.as_ref().and_then(|a| a.permission_mode.clone()))
            .or_else(|| self.config.permission_mode.clone());
        let allowed_tools = task
            .allowed_tools
            .clone()
            .or_else(|| agent.as_ref().and_then(|a| a.allowed_tools.clone()));
        let disallowed_tools = task
            .disallowed_tools
            .clone()
            .or_else(|| agent.as_ref().and_then(|a| a.disallowed_tools.clone()));

        let mut session = Session {
            id: new_id("ses"),
            task_id: task.id.clone(),
            status: SessionStatus::Queued,
            attempt_number: prior.len() as u32 + 1,
            provider: provider.clone(),
            model: model.clone(),
            resume_mode: mode,
            parent_session_id: target.map(|t| t.id.clone()),
            resumed_from: resume_session_id.clone(),
            process_handle: None,
            provider_session_id: None,
            prompt: Some(prompt.clone()),
            summary: None,
            error: None,
            cost_usd: None,
            context_snapshot: task.context_files.clone(),
            skill_snapshot: skills.iter().map(|s| s.name.clone()).collect(),
            created_at: now_rfc3339(),
            started_at: None,
            ended_at: None,
        };
        self.store.put_session(&session).await?;

        // ── Spawn ──
        self.pipeline.register_session(
            &session.id,
            OperationContext {
                task_id: task.id.clone(),
                working_dir: working_dir.clone(),
            },
        );
        let ctx = DriverContext {
            store: self.store.clone(),
            adapter: self.router.clone(),
            pipeline: self.pipeline.clone(),
            approvals: self.approvals.clone(),
            bus: self.bus.clone(),
            auto_commit: task.effective_auto_commit(&project, self.config.auto_commit),
            permission_mode: permission_mode.clone(),
        };
        let config = SpawnConfig {
            provider: provider.clone(),
            model: Some(model),
            working_dir,
            session_id: session.id.clone(),
            resume_session_id,
            fork: mode == Some(ResumeMode::Fork),
            agent_role: agent.as_ref().map(|a| a.name.clone()),
            initial_prompt: Some(prompt.clone()),
            system_prompt: system,
            allowed_tools,
            disallowed_tools,
            permission_mode,
            budget_usd: task.budget_usd,
            fallback_model: task.fallback_model.clone(),
            context_files: task.context_files.clone(),
            mcp_config_paths: task.mcp_config_paths.clone(),
            sub_agents,
            transcript_path: self
                .transcript_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}.jsonl", session.id))),
        };

        let spawned = match self.router.spawn(config).await {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(session_id = %session.id, task_id = %task.id, error = %e, "spawn failed");
                driver::finalize(&ctx, session, ProcessExit::failed(None, e.to_string())).await;
                return Err(SessionStartError::Spawn(e));
            }
        };
        let handle = spawned.handle;
        let inputs = driver::attach(self.router.as_ref(), &handle);

        let wait = Duration::from_millis(self.config.session_id_timeout_ms);
        match self.router.provider_session_id(&handle, wait).await {
            Ok(id) => session.provider_session_id = Some(id),
            Err(e) => debug!(session_id = %session.id, error = %e, "no provider session id"),
        }
        session.process_handle = Some(handle);
        session.status = SessionStatus::Running;
        session.started_at = Some(now_rfc3339());
        if let Err(e) = self.store.put_session(&session).await {
            warn!(session_id = %session.id, error = %e, "failed to persist running session");
        }
        self.record_prompt(&session.id, &prompt).await;
        info!(
            session_id = %session.id,
            task_id = %task.id,
            provider = %provider,
            attempt = session.attempt_number,
            "session started"
        );
        self.bus.publish(BusEvent::SessionStatusChanged {
            session_id: session.id.clone(),
            task_id: task.id.clone(),
            status: SessionStatus::Running,
        });

        let done = tokio::spawn(driver::run(ctx, session.clone(), inputs));
        Ok(StartedSession { session, done })
    }

    /// Terminate a running session. Its driver still finalizes it.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), SessionStartError> {
        let handle = self.running_handle(session_id).await?;
        self.router
            .terminate(&handle)
            .map_err(SessionStartError::Process)?;
        info!(session_id, "session stop requested");
        Ok(())
    }

    /// Answer the session's outstanding tool permission prompt.
    pub async fn answer_permission(
        &self,
        session_id: &str,
        approved: bool,
    ) -> Result<(), SessionStartError> {
        let handle = self.running_handle(session_id).await?;
        self.router
            .send_approval_response(&handle, approved)
            .await
            .map_err(SessionStartError::Process)
    }

    async fn running_handle(
        &self,
        session_id: &str,
    ) -> Result<warden_core::ProcessHandle, SessionStartError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionStartError::SessionNotFound(session_id.to_string()))?;
        match session.process_handle {
            Some(handle) if session.status.is_active() => Ok(handle),
            _ => Err(SessionStartError::NotRunning(session_id.to_string())),
        }
    }

    async fn agent_for(
        &self,
        request: &StartRequest,
        task: &Task,
    ) -> Result<Option<AgentProfile>, SessionStartError> {
        let Some(id) = request.agent_id.as_ref().or(task.agent_id.as_ref()) else {
            return Ok(None);
        };
        self.store
            .get_agent(id)
            .await?
            .map(Some)
            .ok_or_else(|| SessionStartError::AgentNotFound(id.clone()))
    }

    async fn record_prompt(&self, session_id: &str, prompt: &str) {
        let message = Message {
            id: new_id("msg"),
            session_id: session_id.to_string(),
            role: MessageRole::User,
            content: prompt.to_string(),
            created_at: now_rfc3339(),
        };
        if let Err(e) = self.store.append_message(&message).await {
            warn!(session_id, error = %e, "failed to record prompt");
        }
    }
}

/// Explicit target first. Otherwise a retry inherits from the latest prior
/// session with a stored prompt (spawn failures included), while renew and
/// fork need the latest one that has a provider session id.
fn resume_target<'a>(
    request: &StartRequest,
    mode: Option<ResumeMode>,
    prior: &'a [Session],
) -> Result<Option<&'a Session>, SessionStartError> {
    if let Some(id) = &request.resume_from {
        return prior
            .iter()
            .find(|s| &s.id == id)
            .map(Some)
            .ok_or_else(|| SessionStartError::ResumeTargetNotFound(id.clone()));
    }
    let latest = match mode {
        None => None,
        Some(ResumeMode::Retry) => prior
            .iter()
            .rev()
            .find(|s| s.prompt.as_deref().is_some_and(|p| !p.trim().is_empty())),
        Some(ResumeMode::Renew | ResumeMode::Fork) => prior
            .iter()
            .rev()
            .find(|s| s.provider_session_id.is_some()),
    };
    Ok(latest)
}

/// First context file's directory, then the project path. The process cwd
/// is used only for projects registered without a path.
fn working_dir(task: &Task, project_path: &Path) -> Result<PathBuf, SessionStartError> {
    if let Some(first) = task.context_files.first() {
        let path = project_path.join(first);
        if path.is_dir() {
            return Ok(path);
        }
        if path.is_file() {
            if let Some(parent) = path.parent() {
                return Ok(parent.to_path_buf());
            }
        }
    }
    if project_path.as_os_str().is_empty() {
        return std::env::current_dir()
            .map_err(|_| SessionStartError::WorkingDirectoryUnavailable(PathBuf::new()));
    }
    if project_path.is_dir() {
        Ok(project_path.to_path_buf())
    } else {
        Err(SessionStartError::WorkingDirectoryUnavailable(
            project_path.to_path_buf(),
        ))
    }
}
