//! ToolRouter：把多个 ToolPeer 聚合到同一个按工具名寻址的调用面
//!
//! - 路由表（工具名 → 对端名）只在 add_peer / remove_peer 时修改，单个对端的全部工具在一次写锁内登记，
//!   不会出现半登记状态
//! - 同名工具以最后登记的对端为准（记 warn 日志，不报错）
//! - 对端启动或发现失败只记录并跳过，不影响其余对端

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::config::McpSection;
use crate::core::AgentError;
use crate::mcp::{PeerState, PeerTimeouts, ToolDescriptor, ToolPeer};

/// 一次被跳过或失败的对端操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub peer: String,
    pub reason: String,
}

/// close() 的汇总：尝试关闭的数量与失败明细
#[derive(Debug, Default)]
pub struct CloseReport {
    pub attempted: usize,
    pub failures: Vec<PeerFailure>,
}

/// 路由调用的结果：实际处理的对端 + 原样返回的 result
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedResult {
    pub peer: String,
    pub result: Value,
}

#[derive(Default)]
struct RouteTable {
    /// 按加入顺序
    peers: Vec<Arc<ToolPeer>>,
    routes: HashMap<String, String>,
}

impl RouteTable {
    fn peer(&self, name: &str) -> Option<Arc<ToolPeer>> {
        self.peers.iter().find(|p| p.name() == name).cloned()
    }

    /// 移除对端后按剩余对端的加入顺序重建路由，被遮蔽的同名工具重新可达
    fn detach(&mut self, name: &str) -> Option<Arc<ToolPeer>> {
        let idx = self.peers.iter().position(|p| p.name() == name)?;
        let peer = self.peers.remove(idx);
        self.routes.clear();
        for remaining in &self.peers {
            for tool in remaining.tools() {
                self.routes.insert(tool.name, remaining.name().to_string());
            }
        }
        Some(peer)
    }
}

pub struct ToolRouter {
    table: RwLock<RouteTable>,
    failures: Mutex<Vec<PeerFailure>>,
    timeouts: PeerTimeouts,
}

impl ToolRouter {
    pub fn new(timeouts: PeerTimeouts) -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
            failures: Mutex::new(Vec::new()),
            timeouts,
        }
    }

    /// 按配置加入全部启用的服务器；失败的对端只记录
    pub async fn from_config(section: &McpSection) -> Self {
        let router = Self::new(PeerTimeouts::from(section));
        for server in section.servers.iter().filter(|s| s.enabled) {
            let _ = router.add_peer(&server.name, server.command.clone()).await;
        }
        router
    }

    /// 启动对端并发现工具，然后登记路由；同名对端会先被移除
    pub async fn add_peer(
        &self,
        name: &str,
        command: Vec<String>,
    ) -> Result<Vec<ToolDescriptor>, AgentError> {
        if let Some(old) = self.detach(name) {
            tracing::info!(peer = %name, "replacing existing peer");
            if let Err(e) = old.terminate().await {
                self.record_failure(name, &e);
            }
        }

        let peer = match ToolPeer::spawn(name, command, self.timeouts) {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                self.record_failure(name, &e);
                return Err(e);
            }
        };

        let tools = match peer.discover_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                self.record_failure(name, &e);
                let _ = peer.terminate().await;
                return Err(e);
            }
        };

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        for tool in &tools {
            if let Some(previous) = table.routes.insert(tool.name.clone(), name.to_string()) {
                if previous != name {
                    tracing::warn!(
                        tool = %tool.name,
                        previous = %previous,
                        peer = %name,
                        "tool name collision, later peer wins"
                    );
                }
            }
        }
        table.peers.push(peer);
        Ok(tools)
    }

    /// 按 shell 引号规则拆分启动命令后加入
    pub async fn add_peer_command(&self, name: &str, launch: &str) -> Result<Vec<ToolDescriptor>, AgentError> {
        match shlex::split(launch) {
            Some(command) if !command.is_empty() => self.add_peer(name, command).await,
            _ => {
                let err = AgentError::PeerUnavailable(format!("{}: invalid launch command '{}'", name, launch));
                self.record_failure(name, &err);
                Err(err)
            }
        }
    }

    /// 终止并移除对端，同时删除指向它的路由
    pub async fn remove_peer(&self, name: &str) -> Result<bool, AgentError> {
        match self.detach(name) {
            Some(peer) => {
                peer.terminate().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn detach(&self, name: &str) -> Option<Arc<ToolPeer>> {
        self.table.write().unwrap_or_else(|e| e.into_inner()).detach(name)
    }

    fn record_failure(&self, peer: &str, err: &AgentError) {
        tracing::warn!(peer = %peer, "tool peer skipped: {}", err);
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PeerFailure {
                peer: peer.to_string(),
                reason: err.to_string(),
            });
    }

    /// 按工具名路由调用；每次调用输出一条审计日志
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<RoutedResult, AgentError> {
        let peer = {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            let owner = table
                .routes
                .get(tool_name)
                .ok_or_else(|| AgentError::ToolNotFound(tool_name.to_string()))?;
            table
                .peer(owner)
                .ok_or_else(|| AgentError::PeerUnavailable(owner.clone()))?
        };
        if !peer.is_ready() {
            return Err(AgentError::PeerUnavailable(format!(
                "{} is {:?}",
                peer.name(),
                peer.state()
            )));
        }

        let start = Instant::now();
        let args_preview = args_preview(&arguments);
        let result = peer.invoke(tool_name, arguments).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "peer": peer.name(),
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.map(|result| RoutedResult {
            peer: peer.name().to_string(),
            result,
        })
    }

    /// 所有存活对端的工具并集（纯内存，无 I/O）
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .peers
            .iter()
            .filter(|p| p.is_ready())
            .flat_map(|p| p.tools())
            .collect()
    }

    /// 工具名当前路由到的对端
    pub fn route_of(&self, tool_name: &str) -> Option<String> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .routes
            .get(tool_name)
            .cloned()
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .peers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// 各对端名及其当前状态，按加入顺序
    pub fn peer_states(&self) -> Vec<(String, PeerState)> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .peers
            .iter()
            .map(|p| (p.name().to_string(), p.state()))
            .collect()
    }

    pub fn failures(&self) -> Vec<PeerFailure> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 按对端分组的工具清单文本
    pub fn tools_summary(&self) -> String {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        if table.peers.is_empty() {
            return "No MCP servers connected.".to_string();
        }
        let mut lines = Vec::new();
        for peer in &table.peers {
            let tools = peer.tools();
            lines.push(format!("{}: {} tools ({:?})", peer.name(), tools.len(), peer.state()));
            for tool in tools {
                lines.push(format!("  - {}: {}", tool.name, tool.description));
            }
        }
        lines.join("\n")
    }

    /// 并发终止全部对端；总耗时约为一个宽限期，单个失败不影响其余，失败汇总返回
    pub async fn close(&self) -> CloseReport {
        let peers: Vec<Arc<ToolPeer>> = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .peers
            .clone();

        let mut report = CloseReport {
            attempted: peers.len(),
            failures: Vec::new(),
        };
        let mut pending = JoinSet::new();
        for peer in peers {
            pending.spawn(async move {
                let outcome = peer.terminate().await;
                (peer.name().to_string(), outcome)
            });
        }
        while let Some(joined) = pending.join_next().await {
            let (peer, reason) = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((peer, Err(e))) => (peer, e.to_string()),
                Err(e) => ("<unknown>".to_string(), format!("terminate task failed: {}", e)),
            };
            tracing::warn!(peer = %peer, "terminate failed: {}", reason);
            report.failures.push(PeerFailure { peer, reason });
        }
        report
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
