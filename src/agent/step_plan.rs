//! StepPlan：单步动作描述
//!
//! 动作种类是封闭枚举，每种只携带自己需要的参数；模型回复中的未知动作被显式建模为
//! `Unsupported`，由 Executor 以 UnsupportedAction 失败回应，而不是静默忽略。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 模型回复无法解析时使用的兜底描述
pub const FALLBACK_DESCRIPTION: &str = "Parse error, listing files";
/// 兜底命令：无副作用的目录查看
pub const FALLBACK_COMMAND: &str = "ls -la";

/// shell 动作使用的解释器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    #[default]
    Bash,
    PowerShell,
}

/// 一步计划：描述 + 恰好一种动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Shell {
        command: String,
        #[serde(default)]
        interpreter: ShellKind,
    },
    Git {
        command: String,
    },
    Tool {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    WriteFile {
        file_path: String,
        content: String,
    },
    ReadFile {
        file_path: String,
    },
    /// 模型给出了不认识的动作名
    Unsupported {
        requested: String,
    },
}

/// 模型回复中的原始字段（全部可选，除 action / description）
#[derive(Debug, Deserialize)]
pub(crate) struct RawPlan {
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl From<RawPlan> for StepPlan {
    fn from(raw: RawPlan) -> Self {
        let command = raw.command.unwrap_or_default();
        let action = match raw.action.trim().to_lowercase().as_str() {
            "shell" | "bash" => StepAction::Shell {
                command,
                interpreter: ShellKind::Bash,
            },
            "powershell" => StepAction::Shell {
                command,
                interpreter: ShellKind::PowerShell,
            },
            "git" => StepAction::Git { command },
            "tool" | "tool_call" | "mcp" => StepAction::Tool {
                tool_name: raw.tool_name.unwrap_or_default(),
                arguments: raw.arguments.unwrap_or_else(|| Value::Object(Default::default())),
            },
            "write_file" => StepAction::WriteFile {
                file_path: raw.file_path.unwrap_or_default(),
                content: raw.content.unwrap_or_default(),
            },
            "read_file" => StepAction::ReadFile {
                file_path: raw.file_path.unwrap_or_default(),
            },
            _ => StepAction::Unsupported {
                requested: raw.action,
            },
        };
        StepPlan {
            description: raw.description,
            action,
        }
    }
}

impl StepPlan {
    pub fn shell(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Shell {
                command: command.into(),
                interpreter: ShellKind::Bash,
            },
        }
    }

    pub fn git(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Git {
                command: command.into(),
            },
        }
    }

    pub fn tool(description: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Tool {
                tool_name: tool_name.into(),
                arguments,
            },
        }
    }

    pub fn write_file(
        description: impl Into<String>,
        file_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            action: StepAction::WriteFile {
                file_path: file_path.into(),
                content: content.into(),
            },
        }
    }

    pub fn read_file(description: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: StepAction::ReadFile {
                file_path: file_path.into(),
            },
        }
    }

    /// 模型回复不可用时的确定性兜底计划
    pub fn fallback() -> Self {
        Self::shell(FALLBACK_DESCRIPTION, FALLBACK_COMMAND)
    }

    /// 动作种类名（日志用）
    pub fn kind(&self) -> &'static str {
        match self.action {
            StepAction::Shell { .. } => "shell",
            StepAction::Git { .. } => "git",
            StepAction::Tool { .. } => "tool",
            StepAction::WriteFile { .. } => "write_file",
            StepAction::ReadFile { .. } => "read_file",
            StepAction::Unsupported { .. } => "unsupported",
        }
    }

    /// 校验该种类必需的参数非空；Executor 在执行前调用
    pub fn validate(&self) -> Result<(), AgentError> {
        let missing = match &self.action {
            StepAction::Shell { command, .. } | StepAction::Git { command } => {
                blank(command).then_some("command")
            }
            StepAction::Tool { tool_name, .. } => blank(tool_name).then_some("tool_name"),
            StepAction::WriteFile { file_path, content } => {
                if blank(file_path) {
                    Some("file_path")
                } else if content.is_empty() {
                    Some("content")
                } else {
                    None
                }
            }
            StepAction::ReadFile { file_path } => blank(file_path).then_some("file_path"),
            StepAction::Unsupported { .. } => None,
        };
        match missing {
            Some(field) => Err(AgentError::InvalidPlan(format!(
                "{} plan requires a non-empty {}",
                self.kind(),
                field
            ))),
            None => Ok(()),
        }
    }
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> StepPlan {
        let raw: RawPlan = serde_json::from_str(json).unwrap();
        raw.into()
    }

    #[test]
    fn test_action_aliases() {
        let plan = raw(r#"{"action": "bash", "description": "d", "command": "ls"}"#);
        assert_eq!(plan, StepPlan::shell("d", "ls"));

        let plan = raw(r#"{"action": "powershell", "description": "d", "command": "dir"}"#);
        assert!(matches!(
            plan.action,
            StepAction::Shell { interpreter: ShellKind::PowerShell, .. }
        ));

        let plan = raw(r#"{"action": "mcp", "description": "d", "tool_name": "search"}"#);
        assert_eq!(
            plan.action,
            StepAction::Tool {
                tool_name: "search".into(),
                arguments: serde_json::json!({}),
            }
        );
    }

    #[test]
    fn test_unknown_action_is_unsupported() {
        let plan = raw(r#"{"action": "abacus", "description": "deploy"}"#);
        assert_eq!(
            plan.action,
            StepAction::Unsupported {
                requested: "abacus".into()
            }
        );
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_parameters() {
        let cases = [
            StepPlan::shell("d", "  "),
            StepPlan::git("d", ""),
            StepPlan::tool("d", "", serde_json::json!({})),
            StepPlan::write_file("d", "a.txt", ""),
            StepPlan::write_file("d", "", "body"),
            StepPlan::read_file("d", ""),
        ];
        for plan in cases {
            let err = plan.validate().unwrap_err();
            assert!(matches!(err, AgentError::InvalidPlan(_)), "{:?}", plan);
        }
        assert!(StepPlan::write_file("d", "a.txt", "body").validate().is_ok());
    }

    #[test]
    fn test_serialized_shape_is_flat() {
        let plan = StepPlan::read_file("peek", "src/main.rs");
        let v = serde_json::to_value(&plan).unwrap();
        assert_eq!(v["action"], "read_file");
        assert_eq!(v["file_path"], "src/main.rs");
        assert_eq!(v["description"], "peek");
        let back: StepPlan = serde_json::from_value(v).unwrap();
        assert_eq!(back, plan);
    }
}
