pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod ports;
pub mod types;

pub use bus::{BusEvent, EventBus, NullBus};
pub use config::{ProviderSettings, WardenConfig};
pub use error::{StoreError, VcsError};
pub use event::{EventKind, NormalizedEvent, ToolResult, ToolUse};
pub use ids::{new_id, now_rfc3339, parse_rfc3339, ProcessHandle};
pub use ports::{
    AgentRepository, ApprovalRepository, CommitInfo, DiffRepository, FileStatus,
    MessageRepository, ProjectRepository, SessionRepository, Store, TaskRepository,
    StoreResult, VersionControl,
};
pub use types::*;
