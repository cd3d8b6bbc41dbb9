//! Language model provider abstractions and integrations.
//!
//! Defines the `LLM` trait used by the code oracle and the provider clients
//! behind it: OpenAI (and any OpenAI-compatible endpoint) and native Gemini.
//! `ResponseParser` turns a raw completion into a `CodeUnit`.

pub use crate::core_types::{LLMResponse, Message};
use crate::errors::AnalystError;
use async_trait::async_trait;

pub mod providers;
pub mod response_parser;

pub use providers::create_llm_client;
pub use response_parser::ResponseParser;

#[async_trait]
pub trait LLM: Send + Sync {
    async fn generate(&self, messages: Vec<Message>) -> Result<LLMResponse, AnalystError>;
}
