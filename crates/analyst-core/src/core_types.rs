//! Core type definitions shared by the oracle, executor and orchestrator
//!
//! Messages follow the common chat-completions shape so the same conversation can
//! be replayed against any provider. A `CodeUnit` is one proposed solution attempt
//! as produced by the oracle.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider-neutral completion returned by an `LLM` client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LLMResponse {
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Ordered list of turns exchanged with the oracle during one session.
///
/// The conversation is owned by the session and moved into every `generate` call;
/// the oracle hands it back with its own turn appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    turns: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Message::system(prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.turns.last()
    }
}

/// A single proposed solution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub code: String,
    /// Requirement strings as declared by the oracle, e.g. `pandas` or `numpy==1.26`.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub is_final: bool,
}

impl CodeUnit {
    pub fn new(code: impl Into<String>, dependencies: Vec<String>, is_final: bool) -> Self {
        Self {
            code: code.into(),
            dependencies,
            is_final,
        }
    }

    /// A unit is usable only if it carries some source text.
    pub fn is_usable(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// An uploaded input blob, named by its logical key.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}
