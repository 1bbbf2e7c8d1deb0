//! 核心层：错误类型、优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{ActionErrorKind, AgentError};
pub use shutdown::{RouterCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
