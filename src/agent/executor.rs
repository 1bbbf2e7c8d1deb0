//! Executor：按计划种类分派到 shell / git / 文件读写 / 工具路由，并把结果归一为 ActionResult
//!
//! 执行期的任何错误都被捕获为失败载荷，不会越过 execute 向上抛出。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{ActionOutput, ActionResult, StepAction, StepPlan};
use crate::config::ToolsSection;
use crate::core::AgentError;
use crate::mcp::ToolRouter;
use crate::tools::{CommandOutput, GitAdapter, GitCommand, SafeFs, ShellRunner};

pub struct Executor {
    repo: PathBuf,
    fs: SafeFs,
    shell: ShellRunner,
    git: GitAdapter,
    router: Option<Arc<ToolRouter>>,
}

impl Executor {
    pub fn new(repo: impl AsRef<Path>, tools: &ToolsSection) -> Self {
        let fs = SafeFs::new(repo.as_ref());
        let repo = fs.root().to_path_buf();
        Self {
            shell: ShellRunner::new(tools.command_timeout_secs),
            git: GitAdapter::new(&repo, tools.command_timeout_secs),
            fs,
            repo,
            router: None,
        }
    }

    pub fn with_router(mut self, router: Arc<ToolRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn router(&self) -> Option<&Arc<ToolRouter>> {
        self.router.as_ref()
    }

    /// 仓库简短状态（best effort）
    pub async fn repo_state(&self) -> Option<String> {
        self.git.repo_state().await
    }

    pub async fn execute(&self, plan: &StepPlan) -> ActionResult {
        tracing::info!(kind = plan.kind(), description = %plan.description, "execute step");
        let result = self.dispatch(plan).await;
        if let Err(e) = &result {
            tracing::warn!(kind = plan.kind(), "step failed: {}", e);
        }
        result.into()
    }

    async fn dispatch(&self, plan: &StepPlan) -> Result<ActionOutput, AgentError> {
        plan.validate()?;
        match &plan.action {
            StepAction::Shell { command, interpreter } => {
                let out = self.shell.run(command, *interpreter, &self.repo).await?;
                Ok(command_output(command, out))
            }
            StepAction::Git { command } => {
                let parsed = GitCommand::parse(command)?;
                let out = self.git.run(&parsed).await?;
                Ok(command_output(command, out))
            }
            StepAction::Tool { tool_name, arguments } => {
                let router = self
                    .router
                    .as_ref()
                    .ok_or_else(|| AgentError::ToolNotFound(format!("{} (no tool servers connected)", tool_name)))?;
                let routed = router.invoke(tool_name, arguments.clone()).await?;
                Ok(ActionOutput::ToolCall {
                    tool: tool_name.clone(),
                    peer: routed.peer,
                    result: routed.result,
                })
            }
            StepAction::WriteFile { file_path, content } => {
                let (path, bytes) = self.fs.write_file(file_path, content)?;
                Ok(ActionOutput::FileWritten {
                    path: path.display().to_string(),
                    bytes,
                })
            }
            StepAction::ReadFile { file_path } => {
                let (path, content) = self.fs.read_file(file_path)?;
                Ok(ActionOutput::FileRead {
                    path: path.display().to_string(),
                    content,
                })
            }
            StepAction::Unsupported { requested } => Err(AgentError::UnsupportedAction(requested.clone())),
        }
    }
}

fn command_output(command: &str, out: CommandOutput) -> ActionOutput {
    ActionOutput::Command {
        command: command.to_string(),
        stdout: out.stdout,
        stderr: out.stderr,
        status: out.status,
    }
}
