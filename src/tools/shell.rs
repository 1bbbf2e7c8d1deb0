//! Shell 执行器：在工作根目录下运行命令，带超时
//!
//! bash 类命令经 sh -c（Windows 上 cmd /C），PowerShell 命令经 powershell -Command。
//! 非零退出码不算失败，连同 stdout / stderr 一起交给 Reflector 评分；只有无法启动或超时才报错。

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::agent::ShellKind;
use crate::core::AgentError;

/// 子进程输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// 被信号终止时为 -1
    pub status: i32,
}

/// 运行 program + args，超时后强杀并返回 CommandFailed
pub async fn run_process(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput, AgentError> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| AgentError::CommandFailed(format!("'{}' timed out after {:?}", program, timeout)))?
        .map_err(|e| AgentError::CommandFailed(format!("failed to run '{}': {}", program, e)))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status.code().unwrap_or(-1),
    })
}

/// Shell 执行器
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn run(&self, command: &str, interpreter: ShellKind, cwd: &Path) -> Result<CommandOutput, AgentError> {
        tracing::info!(command = %command, interpreter = ?interpreter, "shell execute");
        match interpreter {
            ShellKind::Bash if cfg!(target_os = "windows") => {
                run_process("cmd", &["/C", command], cwd, self.timeout).await
            }
            ShellKind::Bash => run_process("sh", &["-c", command], cwd, self.timeout).await,
            ShellKind::PowerShell => {
                run_process("powershell", &["-Command", command], cwd, self.timeout).await
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_status_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(10);
        let out = runner
            .run("echo hello; echo oops >&2; exit 3", ShellKind::Bash, dir.path())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.status, 3);
    }

    #[tokio::test]
    async fn test_runs_in_working_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = ShellRunner::new(10)
            .run("ls", ShellKind::Bash, dir.path())
            .await
            .unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_is_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner {
            timeout: Duration::from_millis(200),
        };
        let err = runner.run("sleep 5", ShellKind::Bash, dir.path()).await.unwrap_err();
        assert!(matches!(err, AgentError::CommandFailed(_)));
    }
}
