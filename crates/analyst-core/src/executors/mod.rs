//! Disposable execution sandbox for generated code.
//!
//! A `SessionWorkspace` owns the scratch directory, the `EnvironmentManager`
//! provisions an isolated Python environment inside it, and a `CodeExecutor`
//! runs one code unit under a deadline and reports what happened. Isolation is
//! limited to the process boundary and the deadline.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::AnalystError;

pub mod builtins;
pub mod environment;
pub mod subprocess;
pub mod workspace;

pub use environment::{Dependency, EnvironmentHandle, EnvironmentManager, InstallFailure};
pub use subprocess::SubprocessExecutor;
pub use workspace::SessionWorkspace;

pub const EXECUTION_ERROR_MARKER: &str = "--- EXECUTION ERROR ---";
pub const INSTALLATION_ERROR_MARKER: &str = "--- UV INSTALLATION ERROR ---";

/// Value left in the `result` slot by the executed code.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedResult {
    Json(Value),
    /// The result file existed but could not be decoded.
    Malformed(String),
}

impl CapturedResult {
    /// The structured value handed to the orchestrator. A malformed capture is
    /// reported as an error object rather than raised.
    pub fn into_value(self) -> Value {
        match self {
            CapturedResult::Json(value) => value,
            CapturedResult::Malformed(details) => json!({
                "error": "Failed to deserialize result variable",
                "details": details,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    InstallFailed,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

impl ExecutionStatus {
    pub fn label(&self) -> String {
        match self {
            ExecutionStatus::Succeeded => "succeeded".to_string(),
            ExecutionStatus::InstallFailed => "install_failed".to_string(),
            ExecutionStatus::Failed { exit_code: Some(code) } => format!("failed (exit {})", code),
            ExecutionStatus::Failed { exit_code: None } => "failed (signal)".to_string(),
            ExecutionStatus::TimedOut => "timed_out".to_string(),
        }
    }
}

/// Everything observed while running one code unit.
///
/// Retry decisions look at `stderr` only: an empty stderr means no error, even
/// if `status` says otherwise.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub result: Option<CapturedResult>,
    pub status: ExecutionStatus,
}

impl ExecutionOutcome {
    pub fn install_failed(failure: &InstallFailure) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}\n{}", INSTALLATION_ERROR_MARKER, failure.output),
            result: None,
            status: ExecutionStatus::InstallFailed,
        }
    }

    pub fn has_error(&self) -> bool {
        !self.stderr.is_empty()
    }

    /// Text forwarded to the oracle after a non-successful attempt.
    pub fn feedback(&self) -> &str {
        if self.has_error() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Install `dependencies`, then run `code` inside `environment` for at most
    /// `deadline`. Recoverable failures are reported through the outcome; an
    /// `Err` means the sandbox itself is broken.
    async fn run(
        &self,
        environment: &EnvironmentHandle,
        code: &str,
        dependencies: &[String],
        deadline: Duration,
    ) -> Result<ExecutionOutcome, AnalystError>;
}
