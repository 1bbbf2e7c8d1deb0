//! Abacus.AI 部署预测接口客户端
//!
//! 没有对话接口：消息按 "role: content" 逐行拼成一个 prompt，取响应中的 `prediction` 字段。

use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

pub const ABACUS_BASE_URL: &str = "https://api.abacus.ai";

pub struct AbacusClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    deployment_id: String,
    deployment_token: Option<String>,
}

impl AbacusClient {
    pub fn new(
        api_key: String,
        deployment_id: String,
        deployment_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: ABACUS_BASE_URL.to_string(),
            api_key,
            deployment_id,
            deployment_token,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v0/deployments/{}/predict", self.base_url, self.deployment_id)
    }
}

/// 将对话压平为单个 prompt
pub fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmClient for AbacusClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut req = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "prompt": flatten_messages(messages) }));
        if let Some(token) = &self.deployment_token {
            req = req.header("X-Deployment-Token", token);
        }

        let resp = req.send().await.map_err(|e| LlmError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(data
            .get("prediction")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn name(&self) -> &str {
        "abacus"
    }
}
