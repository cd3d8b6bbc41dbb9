//! Generate, execute and repair engine for data-analysis requests.
//!
//! A session takes uploaded files plus a natural-language task, asks a code
//! oracle (an LLM) for Python code, runs it in a disposable `uv` environment,
//! and feeds failures back until the code produces a final JSON answer or the
//! attempt budget runs out.
//!
//! # Architecture Overview
//!
//! - **Session boundary**: `SessionRunner` owns the lifecycle of one request
//! - **Orchestration**: the bounded retry loop in `orchestrator`
//! - **Execution sandbox**: workspace, environment provisioning and subprocess execution
//! - **Language model integration**: OpenAI-compatible and Gemini providers behind `LLM`
//! - **Configuration system**: YAML files with environment overrides

pub mod config;
pub mod core_types;
pub mod errors;
pub mod executors;
pub mod llm;
pub mod oracle;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod trace;

pub use config::*;
pub use core_types::{CodeUnit, Conversation, InputFile, Message, Role};
pub use errors::{AnalystError, ErrorCategory};
pub use executors::CodeExecutor;
pub use llm::LLM;
pub use oracle::{CodeOracle, LlmCodeOracle, OracleReply};
pub use orchestrator::Orchestrator;
pub use session::SessionRunner;

#[cfg(test)]
pub mod test_utils;
