//! Consistency checks run after a configuration is loaded.

use crate::config::types::{AnalystConfig, LlmProvider};
use crate::errors::AnalystError;
use std::path::Path;

impl AnalystConfig {
    pub fn validate(&self) -> Result<(), AnalystError> {
        if self.llm.model.trim().is_empty() {
            return Err(AnalystError::ConfigError(
                "llm.model must not be empty".to_string(),
            ));
        }

        if let LlmProvider::Custom { base_url } = &self.llm.provider {
            if base_url.trim().is_empty() {
                return Err(AnalystError::ConfigError(
                    "Custom provider requires a valid 'base_url'".to_string(),
                ));
            }
        }

        if self.session.max_attempts == 0 {
            return Err(AnalystError::ConfigError(
                "session.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.session.exec_timeout_secs == 0 {
            return Err(AnalystError::ConfigError(
                "session.exec_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.runtime.install_timeout_secs == 0 {
            return Err(AnalystError::ConfigError(
                "runtime.install_timeout_secs must be greater than zero".to_string(),
            ));
        }

        validate_plain_file_name("session.task_file", &self.session.task_file)?;
        validate_plain_file_name("runtime.venv_dir", &self.runtime.venv_dir)?;

        if self.session.task_file == self.runtime.venv_dir {
            return Err(AnalystError::ConfigError(
                "session.task_file and runtime.venv_dir must differ".to_string(),
            ));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(AnalystError::ConfigError(
                "server.request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// A name that resolves to a direct child of the workspace.
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }
    Path::new(name).file_name().map(|f| f == name).unwrap_or(false)
}

fn validate_plain_file_name(field: &str, value: &str) -> Result<(), AnalystError> {
    if is_plain_file_name(value) {
        Ok(())
    } else {
        Err(AnalystError::ConfigError(format!(
            "{} must be a plain file name, got '{}'",
            field, value
        )))
    }
}
