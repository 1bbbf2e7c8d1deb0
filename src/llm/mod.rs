//! LLM 层：客户端抽象、各后端实现与按 provider 名创建的工厂

pub mod abacus;
pub mod deepseek;
pub mod factory;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod textgen;
pub mod traits;

pub use abacus::AbacusClient;
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use factory::{make_llm_client, make_llm_client_with, PROVIDERS};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use ollama::{OllamaClient, OLLAMA_BASE_URL, OLLAMA_MODEL};
pub use openai::{OpenAiClient, TokenUsage};
pub use textgen::{TextGenApi, TextGenClient, HF_TGI_BASE_URL, KOBOLDCPP_BASE_URL, OOBABOOGA_BASE_URL};
pub use traits::{LlmClient, LlmError};
