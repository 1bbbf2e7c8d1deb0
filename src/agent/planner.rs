//! Planner：把（目标、最近历史、工具清单、仓库状态）拼成 prompt，询问模型下一步做什么
//!
//! 模型回复应为单个 JSON 对象，可被一对 ``` 围栏包裹。解析失败或模型调用失败都不向上抛，
//! 而是返回确定性的兜底计划（`ls -la`），保证循环每轮都有可执行的动作。

use std::sync::Arc;

use crate::agent::step_plan::RawPlan;
use crate::agent::{ShellKind, Step, StepPlan};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::mcp::ToolDescriptor;
use crate::memory::Message;

pub const SYSTEM_PROMPT: &str = "You are TrainWreck, a vibe coding agent. Plan the next development step.";

/// 默认携带的历史条数
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// 一次规划的输入
#[derive(Debug, Clone, Copy)]
pub struct PlanningContext<'a> {
    pub goal: &'a str,
    /// 本次运行至今的全部步骤（按迭代顺序）
    pub history: &'a [Step],
    pub tools: &'a [ToolDescriptor],
    pub repo_state: Option<&'a str>,
}

impl<'a> PlanningContext<'a> {
    pub fn new(goal: &'a str) -> Self {
        Self {
            goal,
            history: &[],
            tools: &[],
            repo_state: None,
        }
    }
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    history_window: usize,
    preferred_shell: ShellKind,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            history_window: DEFAULT_HISTORY_WINDOW,
            preferred_shell: ShellKind::Bash,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_preferred_shell(mut self, shell: ShellKind) -> Self {
        self.preferred_shell = shell;
        self
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 询问模型并解析为 StepPlan；任何失败都落到兜底计划
    pub async fn plan(&self, ctx: PlanningContext<'_>) -> StepPlan {
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(self.build_prompt(&ctx))];

        let reply = match self.llm.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(backend = %self.llm.name(), "LLM call failed, using fallback plan: {}", e);
                return StepPlan::fallback();
            }
        };

        match parse_plan(&reply) {
            Ok(plan) => {
                tracing::debug!(kind = plan.kind(), description = %plan.description, "plan parsed");
                plan
            }
            Err(e) => {
                tracing::warn!("{}, using fallback plan", e);
                StepPlan::fallback()
            }
        }
    }

    pub fn build_prompt(&self, ctx: &PlanningContext<'_>) -> String {
        let mut prompt = format!("Goal: {}\n\n", ctx.goal);

        if let Some(state) = ctx.repo_state.filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("Repository State:\n{}\n\n", state));
        }

        let start = ctx.history.len().saturating_sub(self.history_window);
        let recent: Vec<String> = ctx.history[start..]
            .iter()
            .map(|s| format!("- {}: {}", s.description, s.outcome))
            .collect();
        prompt.push_str("Recent History:\n");
        if recent.is_empty() {
            prompt.push_str("(none)\n\n");
        } else {
            prompt.push_str(&recent.join("\n"));
            prompt.push_str("\n\n");
        }

        if !ctx.tools.is_empty() {
            prompt.push_str("Available Tools:\n");
            for tool in ctx.tools {
                prompt.push_str(&format!("- {} (server: {}): {}\n", tool.name, tool.peer, tool.description));
            }
            prompt.push('\n');
        }

        let shell = match self.preferred_shell {
            ShellKind::Bash => "bash",
            ShellKind::PowerShell => "powershell",
        };
        prompt.push_str(&format!(
            r#"Plan the next step to achieve the goal. Prefer "{shell}" for shell commands. Respond with a single JSON object:
{{
  "action": "bash|powershell|git|tool|write_file|read_file",
  "description": "What this step does",
  "command": "command to run (bash, powershell, git)",
  "file_path": "path relative to the repository (write_file, read_file)",
  "content": "file content (write_file)",
  "tool_name": "tool name from Available Tools (tool)",
  "arguments": {{"key": "value"}}
}}
"#
        ));
        prompt
    }
}

/// 解析模型回复；首行为 ``` 时去掉首行，末行为 ``` 时去掉末行
pub fn parse_plan(reply: &str) -> Result<StepPlan, AgentError> {
    let trimmed = reply.trim();
    let body = if trimmed.starts_with("```") {
        let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
        if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
            lines.pop();
        }
        lines.join("\n")
    } else {
        trimmed.to_string()
    };

    let raw: RawPlan = serde_json::from_str(&body)
        .map_err(|e| AgentError::PlanParse(format!("{}: {}", e, preview(trimmed))))?;
    Ok(raw.into())
}

fn preview(s: &str) -> String {
    if s.chars().count() > 120 {
        format!("{}...", s.chars().take(120).collect::<String>())
    } else {
        s.to_string()
    }
}
