//! ToolPeer：持有一个工具服务器子进程，在进程内调用与按行 JSON-RPC 流之间转换
//!
//! 状态机：Starting → Ready → (请求)* → Closing → Closed。
//! 每个请求带自增 id，读取时丢弃通知与 id 不匹配的行，直到等到匹配响应或超时。
//! 同一对端的请求经 io 互斥锁串行化，不同对端之间互不影响。
//! 任何流读写失败都会把对端直接置为 Closed，之后的调用一律 PeerUnavailable。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::McpSection;
use crate::core::AgentError;
use crate::mcp::protocol::{
    RpcRequest, RpcResponse, ToolsListResult, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// 协议超时：单次请求等待匹配响应的上限，以及终止时的宽限期
#[derive(Debug, Clone, Copy)]
pub struct PeerTimeouts {
    pub request: Duration,
    pub terminate_grace: Duration,
}

impl Default for PeerTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(5),
        }
    }
}

impl From<&McpSection> for PeerTimeouts {
    fn from(section: &McpSection) -> Self {
        Self {
            request: section.request_timeout(),
            terminate_grace: section.terminate_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Starting,
    Ready,
    Closing,
    Closed,
}

/// 工具描述：名称、说明与所属对端
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub peer: String,
}

struct PeerIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// 单次请求往返的失败方式
enum ExchangeError {
    /// 流已断开，对端不可再用
    Broken(String),
    /// 本次响应无效，对端仍可用
    Protocol(String),
}

pub struct ToolPeer {
    name: String,
    command: Vec<String>,
    timeouts: PeerTimeouts,
    state: Mutex<PeerState>,
    io: tokio::sync::Mutex<Option<PeerIo>>,
    child: tokio::sync::Mutex<Option<Child>>,
    next_id: AtomicU64,
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl ToolPeer {
    /// 启动子进程并接管其 stdin / stdout；stderr 仅作诊断日志
    pub fn spawn(
        name: impl Into<String>,
        command: Vec<String>,
        timeouts: PeerTimeouts,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AgentError::PeerUnavailable(format!("{}: empty launch command", name)))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::PeerUnavailable(format!("{}: failed to start '{}': {}", name, program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::PeerUnavailable(format!("{}: stdin not captured", name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::PeerUnavailable(format!("{}: stdout not captured", name)))?;

        if let Some(stderr) = child.stderr.take() {
            let peer = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(peer = %peer, "stderr: {}", line);
                }
            });
        }

        tracing::info!(peer = %name, command = ?command, pid = ?child.id(), "tool peer started");

        let peer = Self {
            name,
            command,
            timeouts,
            state: Mutex::new(PeerState::Starting),
            io: tokio::sync::Mutex::new(Some(PeerIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            })),
            child: tokio::sync::Mutex::new(Some(child)),
            next_id: AtomicU64::new(0),
            tools: RwLock::new(Vec::new()),
        };
        peer.set_state(PeerState::Ready);
        Ok(peer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PeerState::Ready
    }

    /// 最近一次发现得到的工具集合
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, next: PeerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(peer = %self.name, from = ?*state, to = ?next, "peer state");
        *state = next;
    }

    fn ensure_ready(&self) -> Result<(), AgentError> {
        match self.state() {
            PeerState::Ready => Ok(()),
            other => Err(AgentError::PeerUnavailable(format!("{} is {:?}", self.name, other))),
        }
    }

    /// 发送 `tools/list`，用结果整体替换缓存的工具集合
    pub async fn discover_tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        let result = self.request(METHOD_TOOLS_LIST, None).await?;
        let listed: ToolsListResult = serde_json::from_value(result).map_err(|e| {
            AgentError::Protocol(format!("{}: malformed tools/list result: {}", self.name, e))
        })?;

        let tools: Vec<ToolDescriptor> = listed
            .tools
            .into_iter()
            .filter(|t| !t.name.is_empty())
            .map(|t| ToolDescriptor {
                name: t.name,
                description: t.description,
                peer: self.name.clone(),
            })
            .collect();

        *self.tools.write().unwrap_or_else(|e| e.into_inner()) = tools.clone();
        tracing::info!(peer = %self.name, count = tools.len(), "tools discovered");
        Ok(tools)
    }

    /// 发送 `tools/call`，原样返回 result 对象
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value, AgentError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.request(METHOD_TOOLS_CALL, Some(params)).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError> {
        self.ensure_ready()?;
        let mut io_guard = self.io.lock().await;
        // 等锁期间对端可能已被关闭
        self.ensure_ready()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let line = RpcRequest::new(id, method, params)
            .to_line()
            .map_err(|e| AgentError::Protocol(format!("{}: encode failed: {}", self.name, e)))?;

        let started = Instant::now();
        let outcome = match io_guard.as_mut() {
            Some(io) => self.exchange(io, &line, id).await,
            None => return Err(AgentError::PeerUnavailable(format!("{} has no open stream", self.name))),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(ExchangeError::Protocol(msg)) => {
                return Err(AgentError::Protocol(format!("{}: {}", self.name, msg)));
            }
            Err(ExchangeError::Broken(msg)) => {
                io_guard.take();
                self.set_state(PeerState::Closed);
                tracing::warn!(peer = %self.name, "stream broken: {}", msg);
                return Err(AgentError::Protocol(format!("{}: {}", self.name, msg)));
            }
        };
        drop(io_guard);

        tracing::debug!(
            peer = %self.name,
            method,
            id,
            duration_ms = started.elapsed().as_millis() as u64,
            "response received"
        );

        if let Some(err) = response.error {
            return Err(AgentError::Protocol(format!(
                "{}: {} rejected ({}): {}",
                self.name, method, err.code, err.message
            )));
        }
        response
            .result
            .ok_or_else(|| AgentError::Protocol(format!("{}: response {} has no result", self.name, id)))
    }

    /// 写出一行请求，读到 id 匹配的响应为止；写、刷新与读取共用同一个请求超时。
    /// 写入未完成就超时的流可能只写出半行，只能视为断开。
    async fn exchange(&self, io: &mut PeerIo, line: &[u8], id: u64) -> Result<RpcResponse, ExchangeError> {
        let mut sent = false;
        let round_trip = async {
            if let Err(e) = io.stdin.write_all(line).await {
                return Err(ExchangeError::Broken(format!("write failed: {}", e)));
            }
            if let Err(e) = io.stdin.flush().await {
                return Err(ExchangeError::Broken(format!("flush failed: {}", e)));
            }
            sent = true;

            loop {
                let raw = match io.stdout.next_line().await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return Err(ExchangeError::Broken("peer closed its output stream".to_string())),
                    Err(e) => return Err(ExchangeError::Broken(format!("read failed: {}", e))),
                };
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                let response: RpcResponse = serde_json::from_str(raw)
                    .map_err(|e| ExchangeError::Protocol(format!("malformed response: {}", e)))?;
                if response.matches(id) {
                    return Ok(response);
                }
                if response.is_notification() {
                    tracing::debug!(peer = %self.name, "notification skipped: {}", raw);
                } else {
                    tracing::warn!(peer = %self.name, expected = id, "discarding mismatched response: {}", raw);
                }
            }
        };

        let outcome = tokio::time::timeout(self.timeouts.request, round_trip).await;
        match outcome {
            Ok(result) => result,
            Err(_) if !sent => Err(ExchangeError::Broken(format!(
                "request {} not written within {:?}",
                id, self.timeouts.request
            ))),
            Err(_) => Err(ExchangeError::Protocol(format!(
                "no response to request {} within {:?}",
                id, self.timeouts.request
            ))),
        }
    }

    /// 发送终止信号，宽限期内未退出则强杀；可重复调用
    pub async fn terminate(&self) -> Result<(), AgentError> {
        let child = self.child.lock().await.take();
        if child.is_none() && self.state() == PeerState::Closed {
            return Ok(());
        }
        self.set_state(PeerState::Closing);

        let outcome = match child {
            Some(mut child) => self.stop_child(&mut child).await,
            None => Ok(()),
        };

        // 进行中的请求会在流关闭后返回，此后再释放管道
        self.io.lock().await.take();
        self.set_state(PeerState::Closed);
        tracing::info!(peer = %self.name, "tool peer closed");
        outcome
    }

    async fn stop_child(&self, child: &mut Child) -> Result<(), AgentError> {
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(peer = %self.name, %status, "peer already exited");
            return Ok(());
        }

        send_terminate(child);
        match tokio::time::timeout(self.timeouts.terminate_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(peer = %self.name, %status, "peer exited");
                Ok(())
            }
            Ok(Err(e)) => Err(AgentError::PeerUnavailable(format!("{}: wait failed: {}", self.name, e))),
            Err(_) => {
                tracing::warn!(
                    peer = %self.name,
                    "peer ignored termination for {:?}, killing",
                    self.timeouts.terminate_grace
                );
                child
                    .kill()
                    .await
                    .map_err(|e| AgentError::PeerUnavailable(format!("{}: kill failed: {}", self.name, e)))
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid 属于尚未被回收的子进程，kill 只发送信号
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fast() -> PeerTimeouts {
        PeerTimeouts {
            request: Duration::from_millis(500),
            terminate_grace: Duration::from_millis(300),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let err = ToolPeer::spawn("ghost", vec!["/nonexistent/peer-binary".into()], fast())
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::PeerUnavailable(_)));

        let err = ToolPeer::spawn("empty", Vec::new(), fast()).err().unwrap();
        assert!(matches!(err, AgentError::PeerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_exited_peer_closes() {
        let peer = ToolPeer::spawn("gone", sh("exit 0"), fast()).unwrap();
        let err = peer.discover_tools().await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)), "{:?}", err);
        assert_eq!(peer.state(), PeerState::Closed);

        let err = peer.invoke("x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::PeerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_discards_notifications_and_stale_ids() {
        let script = r#"read line
echo '{"jsonrpc":"2.0","method":"notifications/message"}'
echo '{"jsonrpc":"2.0","id":99,"result":{"tools":[{"name":"stale"}]}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"fresh","description":"new"},{"description":"nameless"}]}}'
exec sleep 5"#;
        let peer = ToolPeer::spawn("p", sh(script), fast()).unwrap();
        let tools = peer.discover_tools().await.unwrap();
        assert_eq!(
            tools,
            vec![ToolDescriptor {
                name: "fresh".into(),
                description: "new".into(),
                peer: "p".into(),
            }]
        );
        assert_eq!(peer.tools(), tools);
        peer.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_keeps_peer_ready() {
        let peer = ToolPeer::spawn("mute", sh("exec sleep 30"), fast()).unwrap();
        let err = peer.invoke("x", serde_json::json!({})).await.unwrap_err();
        match err {
            AgentError::Protocol(msg) => assert!(msg.contains("within"), "{}", msg),
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert_eq!(peer.state(), PeerState::Ready);
        peer.terminate().await.unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_stalled_write_is_bounded() {
        // 对端从不读 stdin，大请求会塞满管道
        let peer = ToolPeer::spawn("deaf", sh("exec sleep 30"), fast()).unwrap();
        let blob = "x".repeat(1024 * 1024);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            peer.invoke("x", serde_json::json!({ "blob": blob })),
        )
        .await
        .expect("invoke must respect the request timeout");
        assert!(matches!(outcome, Err(AgentError::Protocol(ref m)) if m.contains("not written")), "{:?}", outcome);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(peer.state(), PeerState::Closed);

        let err = peer.invoke("x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::PeerUnavailable(_)));
        peer.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_and_rpc_error() {
        let peer = ToolPeer::spawn("junk", sh("read line; echo 'not json'; exec sleep 5"), fast()).unwrap();
        let err = peer.invoke("x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ref m) if m.contains("malformed")), "{:?}", err);
        peer.terminate().await.unwrap();

        let script = r#"read line
echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such tool"}}'
exec sleep 5"#;
        let peer = ToolPeer::spawn("rejecting", sh(script), fast()).unwrap();
        let err = peer.invoke("x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ref m) if m.contains("no such tool")), "{:?}", err);
        peer.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let peer = ToolPeer::spawn("twice", sh("exec sleep 30"), fast()).unwrap();
        peer.terminate().await.unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
        peer.terminate().await.unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_terminate_force_kills_stubborn_peer() {
        let peer = ToolPeer::spawn("stubborn", sh("trap '' TERM; exec sleep 30"), fast()).unwrap();
        // 给 shell 时间装好 trap
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        peer.terminate().await.unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
