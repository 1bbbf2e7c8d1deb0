//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRAINWRECK__*` 覆盖（双下划线表示嵌套，如 `TRAINWRECK__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub mcp: McpSection,
}

/// [agent] 段：反馈循环参数
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 单步得分达到该阈值即视为目标达成
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// 规划 prompt 中携带的最近历史条数
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// 连续 N 步相同计划且均未达标时提前结束；0 表示关闭
    #[serde(default)]
    pub stagnation_window: usize,
    /// 历史库文件名（相对仓库根目录）
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            success_threshold: default_success_threshold(),
            history_window: default_history_window(),
            stagnation_window: 0,
            db_file: default_db_file(),
        }
    }
}

fn default_max_iterations() -> usize {
    20
}

fn default_success_threshold() -> f64 {
    0.9
}

fn default_history_window() -> usize {
    5
}

fn default_db_file() -> PathBuf {
    PathBuf::from(".trainwreck.db")
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 覆盖各后端的默认模型名
    pub model: Option<String>,
    /// 覆盖各后端的默认地址
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

/// [tools] 段：shell / git 命令超时与解释器
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub shell: crate::agent::ShellKind,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            shell: Default::default(),
        }
    }
}

fn default_command_timeout_secs() -> u64 {
    120
}

/// [mcp] 段：工具服务器列表与协议超时
#[derive(Debug, Clone, Deserialize)]
pub struct McpSection {
    /// 单次请求等待匹配响应的上限（秒）
    #[serde(default = "default_mcp_request_timeout")]
    pub request_timeout_secs: u64,
    /// terminate 时发送 SIGTERM 后的等待时间（秒），超时强杀
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_mcp_request_timeout(),
            terminate_grace_secs: default_terminate_grace(),
            servers: Vec::new(),
        }
    }
}

impl McpSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

fn default_mcp_request_timeout() -> u64 {
    30
}

fn default_terminate_grace() -> u64 {
    5
}

/// [[mcp.servers]] 条目：名称 + 启动命令（程序与参数）
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerEntry {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 从 config 目录加载配置，环境变量 TRAINWRECK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、trainwreck.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRAINWRECK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "trainwreck"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRAINWRECK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.agent.history_window, 5);
        assert!((cfg.agent.success_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.agent.stagnation_window, 0);
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.mcp.request_timeout(), Duration::from_secs(30));
        assert!(cfg.mcp.servers.is_empty());
    }

    #[test]
    fn test_load_servers_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_iterations = 3

[mcp]
request_timeout_secs = 2

[[mcp.servers]]
name = "files"
command = ["node", "server.js"]

[[mcp.servers]]
name = "off"
command = ["true"]
enabled = false
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.history_window, 5);
        assert_eq!(cfg.mcp.request_timeout_secs, 2);
        assert_eq!(cfg.mcp.servers.len(), 2);
        assert_eq!(cfg.mcp.servers[0].command, vec!["node", "server.js"]);
        assert!(cfg.mcp.servers[0].enabled);
        assert!(!cfg.mcp.servers[1].enabled);
    }
}
