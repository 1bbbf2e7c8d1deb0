//! Agent 错误类型
//!
//! 执行期错误（协议、工具、计划、文件）由 Executor 捕获为 ActionResult 的失败载荷，不会越过 Executor；
//! 只有启动期错误（仓库路径、凭据、未知 provider、配置）对用户可见并导致非零退出。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具服务器响应缺失、格式错误或超时
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 工具服务器进程已退出或从未启动
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// 文件系统失败，附带解析后的路径
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 模型回复无法解析；仅在 Planner 内部出现并由兜底计划恢复
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// shell / git 进程无法启动或超时
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(String),

    #[error("Repository path does not exist: {}", .0.display())]
    InvalidRepository(PathBuf),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 投影为可序列化的错误类别，用于标记 ActionResult 的失败载荷
    pub fn kind(&self) -> ActionErrorKind {
        match self {
            AgentError::Protocol(_) => ActionErrorKind::Protocol,
            AgentError::PeerUnavailable(_) => ActionErrorKind::PeerUnavailable,
            AgentError::ToolNotFound(_) => ActionErrorKind::ToolNotFound,
            AgentError::UnsupportedAction(_) => ActionErrorKind::UnsupportedAction,
            AgentError::InvalidPlan(_) => ActionErrorKind::InvalidPlan,
            AgentError::Io { .. } => ActionErrorKind::Io,
            AgentError::PlanParse(_) => ActionErrorKind::PlanParse,
            AgentError::CommandFailed(_) => ActionErrorKind::CommandFailed,
            AgentError::UnknownProvider(_)
            | AgentError::MissingCredentials(_)
            | AgentError::InvalidRepository(_)
            | AgentError::Config(_) => ActionErrorKind::Setup,
        }
    }
}

/// 失败载荷上的错误类别标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    Protocol,
    PeerUnavailable,
    ToolNotFound,
    UnsupportedAction,
    InvalidPlan,
    Io,
    PlanParse,
    CommandFailed,
    Setup,
}

impl std::fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionErrorKind::Protocol => "protocol",
            ActionErrorKind::PeerUnavailable => "peer_unavailable",
            ActionErrorKind::ToolNotFound => "tool_not_found",
            ActionErrorKind::UnsupportedAction => "unsupported_action",
            ActionErrorKind::InvalidPlan => "invalid_plan",
            ActionErrorKind::Io => "io",
            ActionErrorKind::PlanParse => "plan_parse",
            ActionErrorKind::CommandFailed => "command_failed",
            ActionErrorKind::Setup => "setup",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = AgentError::io(
            "/tmp/repo/missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/repo/missing.txt"));
        assert_eq!(err.kind(), ActionErrorKind::Io);
    }

    #[test]
    fn test_setup_errors() {
        assert_eq!(AgentError::UnknownProvider("nope".into()).kind(), ActionErrorKind::Setup);
        assert_eq!(
            AgentError::MissingCredentials("OPENAI_API_KEY".into()).kind(),
            ActionErrorKind::Setup
        );
        assert_eq!(AgentError::ToolNotFound("x".into()).kind(), ActionErrorKind::ToolNotFound);
    }
}
