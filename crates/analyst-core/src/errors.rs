//! Error types for the analysis engine
//!
//! Every failure that can end a session is expressed as an `AnalystError`. The
//! variants are grouped by source so the request boundary can tell "the input was
//! bad" apart from "the system gave up" and "the answer could not be parsed".
//! Failures the repair loop recovers from (dependency installs, non-zero exits,
//! timeouts) never appear here; they travel as attempt feedback instead.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AnalystError {
    #[error("Upload rejected: {0}")]
    UploadError(String),
    #[error("Code oracle failed: {0}")]
    OracleError(String),
    #[error("Environment setup failed: {0}")]
    InstallError(String),
    #[error("Final result could not be decoded: {0}")]
    ResultDecodeError(String),
    #[error("No valid result after {attempts} attempts")]
    BudgetExceeded {
        attempts: usize,
        last_feedback: String,
    },
    #[error("LLM interaction failed: {0}")]
    LLMError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Stable, caller-visible classification of a terminal session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Upload,
    Oracle,
    Install,
    ResultDecode,
    BudgetExceeded,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Upload => "upload_error",
            ErrorCategory::Oracle => "oracle_error",
            ErrorCategory::Install => "install_error",
            ErrorCategory::ResultDecode => "result_decode_error",
            ErrorCategory::BudgetExceeded => "budget_exceeded",
            ErrorCategory::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AnalystError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalystError::UploadError(_) => ErrorCategory::Upload,
            // Transport and parse failures only reach callers through the oracle.
            AnalystError::OracleError(_)
            | AnalystError::LLMError(_)
            | AnalystError::ParsingError(_) => ErrorCategory::Oracle,
            AnalystError::InstallError(_) => ErrorCategory::Install,
            AnalystError::ResultDecodeError(_) => ErrorCategory::ResultDecode,
            AnalystError::BudgetExceeded { .. } => ErrorCategory::BudgetExceeded,
            AnalystError::ConfigError(_)
            | AnalystError::IoError(_)
            | AnalystError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Message that is safe to hand to an external caller. Internal failures are
    /// collapsed to a generic sentence; their details belong in the logs only.
    pub fn public_message(&self) -> String {
        match self {
            AnalystError::UploadError(msg) => msg.clone(),
            AnalystError::OracleError(_)
            | AnalystError::LLMError(_)
            | AnalystError::ParsingError(_) => "LLM failed to generate usable code.".to_string(),
            AnalystError::InstallError(_) => {
                "Failed to prepare the execution environment.".to_string()
            }
            AnalystError::ResultDecodeError(_) => "Final result was not valid JSON.".to_string(),
            AnalystError::BudgetExceeded { .. } => {
                "Could not produce a valid result after maximum error iterations.".to_string()
            }
            AnalystError::ConfigError(_)
            | AnalystError::IoError(_)
            | AnalystError::InternalError(_) => "An internal server error occurred.".to_string(),
        }
    }
}

impl From<std::io::Error> for AnalystError {
    fn from(err: std::io::Error) -> Self {
        AnalystError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AnalystError {
    fn from(err: reqwest::Error) -> Self {
        AnalystError::LLMError(err.to_string())
    }
}
