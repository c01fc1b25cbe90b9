//! 核心层：错误分类、状态黑板、中断与清理

pub mod error;
pub mod shutdown;
pub mod state;

pub use error::{ReasoningError, RunError, ToolError};
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::StateStore;
