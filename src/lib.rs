//! TrainWreck - 自主编码 Agent：Plan → Execute → Reflect 反馈循环
//!
//! 模块划分：
//! - **agent**: StepPlan、Planner、Executor、Reflector 与主循环 ControlLoop
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **llm**: LLM 客户端抽象与各后端（OpenAI 兼容 / Ollama / Abacus / Mock）
//! - **mcp**: 工具服务器客户端（按行 JSON-RPC 子进程）与多服务器路由
//! - **memory**: 对话消息与步骤历史存储（SQLite / 内存）
//! - **tools**: shell、git、沙箱文件系统

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod tools;

pub use agent::{ControlLoop, Executor, Planner, Reflector, StepPlan};
pub use mcp::ToolRouter;
