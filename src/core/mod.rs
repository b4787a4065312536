//! 核心编排层：来源与状态、错误、会话监管、同步编排器、组装与优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod shutdown;
pub mod source;
pub mod state;

pub use builder::{SyncBuilder, SyncRuntime};
pub use error::SyncError;
pub use orchestrator::{ReportDisposition, StartOutcome, SyncOrchestrator};
pub use session_supervisor::{Session, SessionSupervisor};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use source::{detect_source, parse_handle, SyncSource};
pub use state::{Record, SyncState, SyncStatus};
