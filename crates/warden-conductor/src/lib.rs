pub mod adapter;
pub mod approval;
pub mod bus;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod sweeper;
pub mod vcs;

pub use adapter::{
    AdapterError, MockAdapter, ProcessAdapter, ProcessExit, SpawnConfig, SubprocessAdapter,
};
pub use approval::{ApprovalError, ApprovalService, RejectOutcome};
pub use bus::BroadcastBus;
pub use pipeline::{PendingOperationPipeline, PipelineError};
pub use router::ProviderRouter;
pub use session::{SessionOrchestrator, SessionStartError, StartRequest, StartedSession};
pub use sweeper::spawn_sweeper;
pub use vcs::GitCli;
