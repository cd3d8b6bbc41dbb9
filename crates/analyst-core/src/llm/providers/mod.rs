//! LLM provider implementations
//!
//! Each provider implements the common `LLM` trait while handling its own wire
//! protocol and authentication.

use std::sync::Arc;
use crate::config::{LlmConfig, LlmProvider};
use crate::llm::LLM;
use crate::errors::AnalystError;

pub mod openai;
pub mod gemini;

/// Create an LLM client based on the provider configuration
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LLM>, AnalystError> {
    match &config.provider {
        LlmProvider::OpenAI => openai::create_client(config),
        LlmProvider::Gemini => gemini::create_client(config),
        LlmProvider::Custom { base_url } => openai::create_custom_client(config, base_url),
    }
}

/// Resolve the API key from inline config, the named variable, or the
/// provider's conventional variable, in that order.
pub(crate) fn resolve_api_key(config: &LlmConfig, fallback_env: &str) -> Option<String> {
    config
        .auth
        .api_key
        .clone()
        .or_else(|| {
            config
                .auth
                .api_key_env
                .as_ref()
                .and_then(|env_var| std::env::var(env_var).ok())
        })
        .or_else(|| std::env::var(fallback_env).ok())
}
