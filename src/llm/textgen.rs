//! 文本生成类本地服务：KoboldCpp、Oobabooga Text Generation WebUI、HuggingFace TGI
//!
//! 三者都不是 OpenAI 兼容接口。KoboldCpp 与 TGI 只有补全接口，消息按 "role: content" 压平成单个 prompt；
//! Oobabooga 有对话接口，直接发送消息列表。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::abacus::flatten_messages;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

pub const KOBOLDCPP_BASE_URL: &str = "http://localhost:5001";
pub const OOBABOOGA_BASE_URL: &str = "http://localhost:5000";
pub const HF_TGI_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextGenApi {
    KoboldCpp,
    Oobabooga,
    HfTgi,
}

impl TextGenApi {
    pub fn provider(&self) -> &'static str {
        match self {
            TextGenApi::KoboldCpp => "koboldcpp",
            TextGenApi::Oobabooga => "oobabooga",
            TextGenApi::HfTgi => "hf_tgi",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            TextGenApi::KoboldCpp => "/api/v1/generate",
            TextGenApi::Oobabooga => "/api/v1/chat",
            TextGenApi::HfTgi => "/generate",
        }
    }

    fn body(&self, messages: &[Message]) -> Value {
        match self {
            TextGenApi::KoboldCpp => serde_json::json!({ "prompt": flatten_messages(messages) }),
            TextGenApi::Oobabooga => serde_json::json!({ "messages": messages }),
            TextGenApi::HfTgi => serde_json::json!({ "inputs": flatten_messages(messages) }),
        }
    }

    /// 从响应体取生成文本；KoboldCpp / Oobabooga 为 `results[0].text`，TGI 为 `generated_text`
    pub fn extract_text(&self, data: &Value) -> Result<String, LlmError> {
        let text = match self {
            TextGenApi::KoboldCpp | TextGenApi::Oobabooga => data
                .get("results")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("text"))
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::Malformed(format!("{}: missing results[0].text", self.provider())))?,
            TextGenApi::HfTgi => data.get("generated_text").and_then(Value::as_str).unwrap_or_default(),
        };
        Ok(text.to_string())
    }
}

pub struct TextGenClient {
    http: reqwest::Client,
    api: TextGenApi,
    base_url: String,
}

impl TextGenClient {
    pub fn new(api: TextGenApi, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn api(&self) -> TextGenApi {
        self.api
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.api.path())
    }
}

#[async_trait]
impl LlmClient for TextGenClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let resp = self
            .http
            .post(self.endpoint())
            .json(&self.api.body(messages))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        self.api.extract_text(&data)
    }

    fn name(&self) -> &str {
        self.api.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_and_bodies() {
        let client = TextGenClient::new(TextGenApi::KoboldCpp, "http://127.0.0.1:5001/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:5001/api/v1/generate");

        let messages = [Message::system("be brief"), Message::user("list files")];
        assert_eq!(
            TextGenApi::HfTgi.body(&messages),
            serde_json::json!({ "inputs": "system: be brief\nuser: list files" })
        );
        let chat = TextGenApi::Oobabooga.body(&messages);
        assert_eq!(chat["messages"][1]["content"], "list files");
    }

    #[test]
    fn test_extract_text() {
        let kobold = serde_json::json!({ "results": [{ "text": "{\"action\":\"bash\"}" }] });
        assert_eq!(
            TextGenApi::KoboldCpp.extract_text(&kobold).unwrap(),
            "{\"action\":\"bash\"}"
        );
        assert!(matches!(
            TextGenApi::Oobabooga.extract_text(&serde_json::json!({ "results": [] })),
            Err(LlmError::Malformed(_))
        ));

        let tgi = serde_json::json!({ "generated_text": "ok" });
        assert_eq!(TextGenApi::HfTgi.extract_text(&tgi).unwrap(), "ok");
        assert_eq!(TextGenApi::HfTgi.extract_text(&serde_json::json!({})).unwrap(), "");
    }
}
