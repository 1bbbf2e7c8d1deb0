//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Ollama / Abacus / Mock）实现 LlmClient：给定消息列表，返回一段完整文本。
//! 规划器只关心文本；解析与兜底在 Planner 中完成。

use async_trait::async_trait;

use crate::memory::Message;

/// 后端调用错误（传输失败、非 2xx、响应结构不符）
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response malformed: {0}")]
    Malformed(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 后端名（日志用）
    fn name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
