//! Code oracle: the component that proposes the next `CodeUnit`.
//!
//! The orchestrator only depends on the `CodeOracle` trait. `LlmCodeOracle`
//! is the production implementation backed by any `LLM` provider.

use crate::core_types::{CodeUnit, Conversation, Message};
use crate::errors::AnalystError;
use crate::llm::{ResponseParser, LLM};
use async_trait::async_trait;
use std::sync::Arc;

/// What one `generate` call hands back: the conversation with the oracle's
/// own turn appended, and the code unit if one could be extracted.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub conversation: Conversation,
    pub code_unit: Option<CodeUnit>,
}

#[async_trait]
pub trait CodeOracle: Send + Sync {
    async fn generate(&self, conversation: Conversation) -> Result<OracleReply, AnalystError>;
}

pub struct LlmCodeOracle {
    llm: Arc<dyn LLM>,
}

impl LlmCodeOracle {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl CodeOracle for LlmCodeOracle {
    async fn generate(&self, mut conversation: Conversation) -> Result<OracleReply, AnalystError> {
        let response = self.llm.generate(conversation.turns().to_vec()).await?;

        if let Some(usage) = &response.usage {
            log::debug!(
                "Oracle usage: prompt={} completion={} total={}",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens
            );
        }

        let content = response.content.unwrap_or_default();
        let code_unit = match ResponseParser::parse_code_unit(&content) {
            Ok(unit) => Some(unit),
            Err(e) => {
                log::warn!("Oracle reply could not be parsed: {}", e);
                None
            }
        };

        conversation.push(Message::assistant(content));
        Ok(OracleReply {
            conversation,
            code_unit,
        })
    }
}
