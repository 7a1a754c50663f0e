//! Session start, supervision and prompt assembly.

pub mod discovery;
mod driver;
pub mod prompt;
mod start;

pub use discovery::{DiscoveryRoots, Skill};
pub use driver::BYPASS_PERMISSIONS;
pub use start::{SessionOrchestrator, SessionStartError, StartRequest, StartedSession};
