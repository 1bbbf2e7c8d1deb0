//! 反馈循环的数据模型：ActionResult（执行结果）、Reflection（评分）、Step（一轮记录）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::StepPlan;
use crate::core::{ActionErrorKind, AgentError};

/// 执行结果：成功载荷与失败载荷二选一，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success(ActionOutput),
    Failure(ActionFailure),
}

/// 按动作种类区分的成功载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutput {
    /// shell / git 命令
    Command {
        command: String,
        stdout: String,
        stderr: String,
        status: i32,
    },
    FileRead {
        path: String,
        content: String,
    },
    FileWritten {
        path: String,
        bytes: usize,
    },
    /// 工具调用结果（对本层不透明）
    ToolCall {
        tool: String,
        peer: String,
        result: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub kind: ActionErrorKind,
    pub message: String,
}

impl ActionResult {
    pub fn failure(err: &AgentError) -> Self {
        ActionResult::Failure(ActionFailure {
            kind: err.kind(),
            message: err.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    /// 命令退出码；非命令类结果视为 0
    pub fn status_code(&self) -> i32 {
        match self {
            ActionResult::Success(ActionOutput::Command { status, .. }) => *status,
            _ => 0,
        }
    }

    /// 诊断输出（stderr）；非命令类结果为空
    pub fn diagnostics(&self) -> &str {
        match self {
            ActionResult::Success(ActionOutput::Command { stderr, .. }) => stderr,
            _ => "",
        }
    }

    pub fn error_kind(&self) -> Option<ActionErrorKind> {
        match self {
            ActionResult::Failure(f) => Some(f.kind),
            ActionResult::Success(_) => None,
        }
    }
}

impl From<Result<ActionOutput, AgentError>> for ActionResult {
    fn from(result: Result<ActionOutput, AgentError>) -> Self {
        match result {
            Ok(output) => ActionResult::Success(output),
            Err(e) => ActionResult::failure(&e),
        }
    }
}

/// 评分结果：score ∈ [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub score: f64,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

/// 一轮记录；score / description / outcome 为冗余字段，便于扫描历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub iteration: usize,
    pub plan: StepPlan,
    pub result: ActionResult,
    pub reflection: Reflection,
    pub score: f64,
    pub description: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(iteration: usize, plan: StepPlan, result: ActionResult, reflection: Reflection) -> Self {
        Self {
            iteration,
            score: reflection.score,
            description: plan.description.clone(),
            outcome: reflection.feedback.clone(),
            plan,
            result,
            reflection,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_kind() {
        let result = ActionResult::failure(&AgentError::ToolNotFound("z".into()));
        assert_eq!(result.error_kind(), Some(ActionErrorKind::ToolNotFound));
        assert!(!result.is_success());
        assert_eq!(result.status_code(), 0);
    }

    #[test]
    fn test_step_denormalizes_fields() {
        let reflection = Reflection {
            score: 0.6,
            feedback: "Command succeeded with warnings: w".into(),
            suggestions: vec!["Consider addressing the warnings".into()],
        };
        let result = ActionResult::Success(ActionOutput::Command {
            command: "ls".into(),
            stdout: String::new(),
            stderr: "w".into(),
            status: 0,
        });
        let step = Step::new(2, StepPlan::shell("list", "ls"), result, reflection);
        assert_eq!(step.iteration, 2);
        assert_eq!(step.score, 0.6);
        assert_eq!(step.description, "list");
        assert_eq!(step.outcome, "Command succeeded with warnings: w");
    }
}
