pub mod gemini;

use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;

/// Raw model reply plus the token counters reported by the provider.
#[derive(Debug, Clone)]
pub struct LLMReply {
    pub text: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<LLMReply>;
    async fn list_models(&self, config: &LLMConfig) -> Result<Vec<String>>;
}
