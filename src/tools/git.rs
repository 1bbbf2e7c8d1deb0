//! Git 适配：把 "git <子命令> ..." 命令行解析为封闭的子命令枚举，再在仓库根目录执行
//!
//! 支持 status / add / commit / push / pull / branch / checkout / diff / log；
//! 首词不是 git 为 InvalidPlan，其他子命令为 UnsupportedAction。

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::AgentError;
use crate::tools::shell::{run_process, CommandOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCommand {
    Status,
    /// 空表示 "."
    Add(Vec<String>),
    Commit { message: String },
    Push,
    Pull,
    /// 创建并切换
    Branch(String),
    Checkout(String),
    Diff(Vec<String>),
    Log,
}

impl GitCommand {
    pub fn parse(line: &str) -> Result<Self, AgentError> {
        let parts = shlex::split(line)
            .ok_or_else(|| AgentError::InvalidPlan(format!("unbalanced quotes in '{}'", line)))?;
        let mut parts = parts.into_iter();

        match parts.next().as_deref() {
            Some("git") => {}
            _ => return Err(AgentError::InvalidPlan(format!("not a git command: '{}'", line))),
        }
        let sub = parts
            .next()
            .ok_or_else(|| AgentError::InvalidPlan("git command without subcommand".to_string()))?;
        let args: Vec<String> = parts.collect();

        let cmd = match sub.as_str() {
            "status" => GitCommand::Status,
            "add" => GitCommand::Add(args),
            "commit" => {
                let message = args
                    .iter()
                    .filter(|a| !matches!(a.as_str(), "-m" | "--message"))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                let message = message.trim_matches(|c| c == '"' || c == '\'').trim().to_string();
                if message.is_empty() {
                    return Err(AgentError::InvalidPlan("git commit requires a message".to_string()));
                }
                GitCommand::Commit { message }
            }
            "push" => GitCommand::Push,
            "pull" => GitCommand::Pull,
            "branch" => GitCommand::Branch(args.into_iter().next().unwrap_or_else(|| "new-branch".to_string())),
            "checkout" => GitCommand::Checkout(args.into_iter().next().unwrap_or_else(|| "main".to_string())),
            "diff" => GitCommand::Diff(args),
            "log" => GitCommand::Log,
            other => {
                return Err(AgentError::UnsupportedAction(format!("git {}", other)));
            }
        };
        Ok(cmd)
    }
}

/// 在固定仓库根目录下执行 git
#[derive(Debug, Clone)]
pub struct GitAdapter {
    repo: PathBuf,
    timeout: Duration,
}

impl GitAdapter {
    pub fn new(repo: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, AgentError> {
        run_process("git", args, &self.repo, self.timeout).await
    }

    pub async fn run(&self, cmd: &GitCommand) -> Result<CommandOutput, AgentError> {
        tracing::info!(command = ?cmd, repo = %self.repo.display(), "git execute");
        match cmd {
            GitCommand::Status => self.git(&["status"]).await,
            GitCommand::Add(files) => {
                let mut args = vec!["add"];
                if files.is_empty() {
                    args.push(".");
                } else {
                    args.extend(files.iter().map(String::as_str));
                }
                self.git(&args).await
            }
            GitCommand::Commit { message } => self.git(&["commit", "-m", message]).await,
            GitCommand::Push => {
                let branch = self.current_branch().await?;
                self.git(&["push", "origin", &branch]).await
            }
            GitCommand::Pull => {
                let branch = self.current_branch().await?;
                self.git(&["pull", "origin", &branch]).await
            }
            GitCommand::Branch(name) => {
                let created = self.git(&["branch", name]).await?;
                if created.status != 0 {
                    return Ok(created);
                }
                let switched = self.git(&["checkout", name]).await?;
                Ok(CommandOutput {
                    stdout: format!("{}{}", created.stdout, switched.stdout),
                    stderr: switched.stderr,
                    status: switched.status,
                })
            }
            GitCommand::Checkout(branch) => self.git(&["checkout", branch]).await,
            GitCommand::Diff(args) => {
                let mut full = vec!["diff"];
                full.extend(args.iter().map(String::as_str));
                self.git(&full).await
            }
            GitCommand::Log => self.git(&["log", "--max-count=10", "--oneline"]).await,
        }
    }

    async fn current_branch(&self) -> Result<String, AgentError> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = out.stdout.trim();
        if out.status != 0 || branch.is_empty() {
            return Err(AgentError::CommandFailed(format!(
                "cannot determine current branch: {}",
                out.stderr.trim()
            )));
        }
        Ok(branch.to_string())
    }

    /// 简短仓库状态（供规划 prompt 使用）；不是 git 仓库或 git 不可用时返回 None
    pub async fn repo_state(&self) -> Option<String> {
        match self.git(&["status", "--short", "--branch"]).await {
            Ok(out) if out.status == 0 => Some(out.stdout.trim_end().to_string()),
            _ => None,
        }
    }
}
