//! 离线 LLM 客户端（用于测试与无网络运行）
//!
//! - MockLlmClient：总是返回列目录的 shell 计划
//! - ScriptedLlmClient：按顺序回放预置回复，用完后重复最后一条；同时记录收到的 prompt

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// Mock 客户端：固定返回 `ls -la` 计划
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Ok(r#"{"action": "bash", "command": "ls -la", "description": "List files in the repository"}"#.to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 脚本客户端：Err 项模拟传输失败
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的全部请求（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let next = self.replies.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let reply = match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err("script exhausted".to_string())),
        };
        reply.map_err(LlmError::Request)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replays_then_repeats_last() {
        let client = ScriptedLlmClient::with_results(vec![Ok("a".to_string()), Err("down".to_string())]);
        assert_eq!(client.complete(&[Message::user("1")]).await.unwrap(), "a");
        assert!(client.complete(&[Message::user("2")]).await.is_err());
        assert!(client.complete(&[Message::user("3")]).await.is_err());
        assert_eq!(client.calls(), 3);
        assert_eq!(client.prompts()[1][0].content, "2");
    }

    #[tokio::test]
    async fn test_empty_script_is_error() {
        let client = ScriptedLlmClient::new(Vec::<String>::new());
        assert!(matches!(
            client.complete(&[]).await,
            Err(LlmError::Request(_))
        ));
    }
}
