use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::openai::OpenAiChat;

pub const DEFAULT_CONTEXT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's \
     question based on the provided context. If the context doesn't contain relevant \
     information, say so clearly.";

/// A chat model that answers single-turn prompts.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends an optional system instruction plus one user message and returns the reply.
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String>;

    /// Answers `query` grounded on `context`, using the default grounding
    /// instruction unless `system_prompt` is given.
    async fn generate_with_context(
        &self,
        query: &str,
        context: &[String],
        system_prompt: Option<&str>,
    ) -> Result<String> {
        let prompt = build_context_prompt(query, context);
        let system = system_prompt
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTEXT_SYSTEM_PROMPT);
        self.generate(&prompt, Some(system)).await
    }
}

pub fn build_context_prompt(query: &str, context: &[String]) -> String {
    format!("Context:\n{}\n\nQuestion: {query}", context.join("\n\n"))
}

pub fn language_model_from_config(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let api_key = Some(config.api_key.clone())
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    tracing::info!("language model {} at {}", config.model, config.base_url);
    Ok(Arc::new(OpenAiChat::new(config, api_key)?))
}
