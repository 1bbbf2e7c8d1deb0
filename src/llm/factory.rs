//! 按 provider 名创建 LLM 客户端
//!
//! 模型名 / 地址的优先级：配置文件 [llm] 覆盖 > 各后端环境变量 > 内置默认值。
//! 未知 provider 与缺少必需密钥都是启动期错误。

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::core::AgentError;
use crate::llm::{
    create_deepseek_client, AbacusClient, LlmClient, LlmError, MockLlmClient, OllamaClient, OpenAiClient,
    TextGenApi, TextGenClient, HF_TGI_BASE_URL, KOBOLDCPP_BASE_URL, OLLAMA_BASE_URL, OLLAMA_MODEL,
    OOBABOOGA_BASE_URL,
};

/// 支持的 provider 名
pub const PROVIDERS: &[&str] = &[
    "openai", "deepseek", "ollama", "lmstudio", "vllm", "localai", "llamacpp", "jan", "koboldcpp", "oobabooga",
    "hf_tgi", "abacus", "mock",
];

/// 非 OpenAI 兼容的文本生成服务：(provider, 接口, 地址环境变量, 默认地址)
const TEXT_GENERATION: &[(&str, TextGenApi, &str, &str)] = &[
    ("koboldcpp", TextGenApi::KoboldCpp, "KOBOLDCPP_BASE_URL", KOBOLDCPP_BASE_URL),
    ("oobabooga", TextGenApi::Oobabooga, "OOBABOOGA_BASE_URL", OOBABOOGA_BASE_URL),
    ("hf_tgi", TextGenApi::HfTgi, "HF_TGI_BASE_URL", HF_TGI_BASE_URL),
];

/// OpenAI 兼容的本地服务：(provider, 地址环境变量, 默认地址, 模型环境变量, 默认模型)
const LOCAL_OPENAI_COMPATIBLE: &[(&str, &str, &str, &str, &str)] = &[
    ("lmstudio", "LMSTUDIO_BASE_URL", "http://localhost:1234", "LMSTUDIO_MODEL", "local-model"),
    ("vllm", "VLLM_BASE_URL", "http://localhost:8000", "VLLM_MODEL", "meta-llama/Llama-2-7b-hf"),
    ("localai", "LOCALAI_BASE_URL", "http://localhost:8080", "LOCALAI_MODEL", "local-model"),
    ("llamacpp", "LLAMACPP_BASE_URL", "http://localhost:8080", "LLAMACPP_MODEL", "local-model"),
    ("jan", "JAN_BASE_URL", "http://localhost:1337", "JAN_MODEL", "local-model"),
];

/// 从进程环境变量读取配置
pub fn make_llm_client(provider: &str, section: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    make_llm_client_with(provider, section, |key| std::env::var(key).ok())
}

/// 同 make_llm_client，但环境变量来源可注入
pub fn make_llm_client_with<F>(
    provider: &str,
    section: &LlmSection,
    env: F,
) -> Result<Arc<dyn LlmClient>, AgentError>
where
    F: Fn(&str) -> Option<String>,
{
    let provider = provider.trim().to_lowercase();
    let timeout = Duration::from_secs(section.request_timeout_secs);
    let require = |key: &str| {
        env(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AgentError::MissingCredentials(key.to_string()))
    };
    let setup = |e: LlmError| AgentError::Config(e.to_string());

    let client: Arc<dyn LlmClient> = match provider.as_str() {
        "openai" => {
            let key = require("OPENAI_API_KEY")?;
            let model = section
                .model
                .clone()
                .or_else(|| env("OPENAI_MODEL"))
                .unwrap_or_else(|| "gpt-4".to_string());
            Arc::new(
                OpenAiClient::new("openai", section.base_url.as_deref(), &model, &key)
                    .with_temperature(section.temperature)
                    .with_timeout(timeout),
            )
        }
        "deepseek" => {
            let key = require("DEEPSEEK_API_KEY")?;
            let model = section.model.clone().or_else(|| env("DEEPSEEK_MODEL"));
            Arc::new(
                create_deepseek_client(&key, model.as_deref(), section.base_url.as_deref())
                    .with_temperature(section.temperature)
                    .with_timeout(timeout),
            )
        }
        "ollama" => {
            let base = section
                .base_url
                .clone()
                .or_else(|| env("OLLAMA_BASE_URL"))
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
            let model = section
                .model
                .clone()
                .or_else(|| env("OLLAMA_MODEL"))
                .unwrap_or_else(|| OLLAMA_MODEL.to_string());
            Arc::new(OllamaClient::new(&base, &model, section.temperature, timeout).map_err(setup)?)
        }
        "abacus" => {
            let key = require("ABACUS_API_KEY")?;
            let deployment = require("ABACUS_DEPLOYMENT_ID")?;
            let token = env("ABACUS_DEPLOYMENT_TOKEN").filter(|v| !v.is_empty());
            let mut client = AbacusClient::new(key, deployment, token, timeout).map_err(setup)?;
            if let Some(base) = &section.base_url {
                client = client.with_base_url(base);
            }
            Arc::new(client)
        }
        "mock" => Arc::new(MockLlmClient),
        other => match TEXT_GENERATION.iter().find(|(name, ..)| *name == other).copied() {
            Some((_, api, url_var, default_url)) => {
                let base = section
                    .base_url
                    .clone()
                    .or_else(|| env(url_var))
                    .unwrap_or_else(|| default_url.to_string());
                Arc::new(TextGenClient::new(api, &base, timeout).map_err(setup)?)
            }
            None => {
                let (name, url_var, default_url, model_var, default_model) = LOCAL_OPENAI_COMPATIBLE
                    .iter()
                    .find(|(name, ..)| *name == other)
                    .copied()
                    .ok_or_else(|| AgentError::UnknownProvider(other.to_string()))?;
                let base = section
                    .base_url
                    .clone()
                    .or_else(|| env(url_var))
                    .unwrap_or_else(|| default_url.to_string());
                let model = section
                    .model
                    .clone()
                    .or_else(|| env(model_var))
                    .unwrap_or_else(|| default_model.to_string());
                // 本地服务不校验密钥，但 OpenAI 客户端需要一个非空值
                let key = env("OPENAI_API_KEY").unwrap_or_else(|| "not-needed".to_string());
                Arc::new(
                    OpenAiClient::new(name, Some(&format!("{}/v1", base.trim_end_matches('/'))), &model, &key)
                        .with_temperature(section.temperature)
                        .with_timeout(timeout),
                )
            }
        },
    };

    tracing::info!(provider = %provider, backend = %client.name(), "LLM client ready");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_unknown_provider() {
        let err = make_llm_client_with("gpt4all", &LlmSection::default(), env_of(&[])).err().unwrap();
        assert!(matches!(err, AgentError::UnknownProvider(ref p) if p == "gpt4all"));
        assert_eq!(err.kind(), crate::core::ActionErrorKind::Setup);
    }

    #[test]
    fn test_missing_credentials() {
        let section = LlmSection::default();
        let err = make_llm_client_with("openai", &section, env_of(&[])).err().unwrap();
        assert!(matches!(err, AgentError::MissingCredentials(ref k) if k == "OPENAI_API_KEY"));

        let err = make_llm_client_with("abacus", &section, env_of(&[("ABACUS_API_KEY", "k")]))
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::MissingCredentials(ref k) if k == "ABACUS_DEPLOYMENT_ID"));
    }

    #[test]
    fn test_known_providers_build() {
        let section = LlmSection::default();
        let env = env_of(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DEEPSEEK_API_KEY", "sk-ds"),
            ("ABACUS_API_KEY", "k"),
            ("ABACUS_DEPLOYMENT_ID", "d"),
        ]);
        for provider in PROVIDERS {
            let client = make_llm_client_with(provider, &section, &env).unwrap();
            assert_eq!(client.name(), *provider);
        }
        // 大小写不敏感
        assert_eq!(make_llm_client_with("MOCK", &section, &env).unwrap().name(), "mock");
    }

    #[test]
    fn test_text_generation_servers() {
        let section = LlmSection::default();
        let env = env_of(&[("KOBOLDCPP_BASE_URL", "http://gpu-box:5001")]);
        for provider in ["koboldcpp", "oobabooga", "hf_tgi", "HF_TGI"] {
            let client = make_llm_client_with(provider, &section, &env).unwrap();
            assert_eq!(client.name(), provider.to_lowercase());
        }
    }
}
