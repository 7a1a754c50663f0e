//! Agent process adapters.
//!
//! One [`ProcessAdapter`] per provider owns its subprocesses: it spawns them,
//! writes to stdin, parses stdout into [`NormalizedEvent`]s, and reports exit.
//! [`SubprocessAdapter`] is generic over a [`ProviderProfile`] that knows the
//! provider's command line and wire format.

mod capture;
pub mod claude;
pub mod codex;
mod mock;
mod process;
mod subscribers;

pub use capture::fallback_session_id;
pub use mock::MockAdapter;
pub use process::{CommandSpec, PermissionRequest, ProviderProfile, SubprocessAdapter};
pub(crate) use subscribers::lock;
pub use subscribers::Subscription;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use warden_core::{NormalizedEvent, ProcessHandle};

pub type EventListener = Box<dyn Fn(&NormalizedEvent) + Send + Sync>;
pub type ExitListener = Box<dyn FnOnce(&ProcessExit) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown process: {0}")]
    UnknownProcess(ProcessHandle),
    #[error("no adapter registered for provider \"{0}\"")]
    UnknownProvider(String),
    #[error("invalid spawn configuration: {0}")]
    Config(String),
    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stdin of {0} is closed")]
    StdinClosed(ProcessHandle),
    #[error("no permission request is waiting on {0}")]
    NoPendingPermission(ProcessHandle),
    #[error("{provider} does not support {what}")]
    Unsupported {
        provider: String,
        what: &'static str,
    },
}

impl AdapterError {
    /// Configuration and precondition failures are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::SpawnFailed { .. })
    }
}

/// Sub-agent definition passed through to providers that support them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubAgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub provider: String,
    pub model: Option<String>,
    pub working_dir: PathBuf,
    /// Internal session id, assigned before spawn.
    pub session_id: String,
    /// Provider session to resume; excludes a fresh provider id.
    pub resume_session_id: Option<String>,
    pub fork: bool,
    pub agent_role: Option<String>,
    /// Written to stdin once the first event subscriber is attached, so the
    /// subscriber sees every event the prompt produces.
    pub initial_prompt: Option<String>,
    pub system_prompt: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
    pub permission_mode: Option<String>,
    pub budget_usd: Option<f64>,
    pub fallback_model: Option<String>,
    pub context_files: Vec<PathBuf>,
    pub mcp_config_paths: Vec<PathBuf>,
    pub sub_agents: Vec<SubAgentDefinition>,
    /// Raw stdout is appended here when set.
    pub transcript_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
    /// Last stderr lines, or the reason the process could not be supervised.
    pub error: Option<String>,
}

impl ProcessExit {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            success: true,
            error: None,
        }
    }

    pub fn failed(code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            code,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait::async_trait]
pub trait ProcessAdapter: Send + Sync {
    fn provider(&self) -> &str;

    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, AdapterError>;

    async fn send(&self, handle: &ProcessHandle, text: &str) -> Result<(), AdapterError>;

    /// Answer the process's outstanding permission prompt.
    async fn send_approval_response(
        &self,
        handle: &ProcessHandle,
        approved: bool,
    ) -> Result<(), AdapterError>;

    /// Request a graceful stop and forget the handle. Exit listeners still fire.
    fn terminate(&self, handle: &ProcessHandle) -> Result<(), AdapterError>;

    fn subscribe(
        &self,
        handle: &ProcessHandle,
        on_event: EventListener,
    ) -> Result<Subscription, AdapterError>;

    /// Exit notification is sticky: subscribing after exit fires immediately.
    fn subscribe_exit(
        &self,
        handle: &ProcessHandle,
        on_exit: ExitListener,
    ) -> Result<Subscription, AdapterError>;

    fn is_running(&self, handle: &ProcessHandle) -> bool;

    /// Provider-assigned session id; after `wait` without one, a
    /// deterministic fallback derived from the handle.
    async fn provider_session_id(
        &self,
        handle: &ProcessHandle,
        wait: Duration,
    ) -> Result<String, AdapterError>;
}
