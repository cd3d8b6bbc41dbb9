//! Configuration loader for YAML files and environment resolution
//!
//! Loading runs in three steps: parse the YAML, fold in environment files and
//! variable overrides, then validate.

use crate::config::types::*;
use crate::errors::AnalystError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const MAX_ATTEMPTS_ENV: &str = "ANALYST_MAX_ATTEMPTS";
pub const EXEC_TIMEOUT_ENV: &str = "ANALYST_EXEC_TIMEOUT";
pub const LOG_LEVEL_ENV: &str = "ANALYST_LOG_LEVEL";

const DEFAULT_CONFIG_FILE: &str = "analyst.yaml";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<AnalystConfig, AnalystError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            AnalystError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content, path.parent()).await
    }

    /// Load the first config file found in the conventional locations, or the
    /// defaults when there is none.
    pub async fn discover() -> Result<AnalystConfig, AnalystError> {
        for candidate in Self::default_locations() {
            if candidate.exists() {
                log::info!("Using configuration file {}", candidate.display());
                return Self::from_file(&candidate).await;
            }
        }
        log::info!("No configuration file found, using built-in defaults");
        Self::from_str("{}", None).await
    }

    /// `./analyst.yaml`, then `<config dir>/analyst/analyst.yaml`.
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            locations.push(config_dir.join("analyst").join(DEFAULT_CONFIG_FILE));
        }
        locations
    }

    /// Load configuration from a YAML string
    pub async fn from_str(
        content: &str,
        base_dir: Option<&Path>,
    ) -> Result<AnalystConfig, AnalystError> {
        let mut config: AnalystConfig = if content.trim().is_empty() {
            AnalystConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                AnalystError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::resolve_environment(&mut config, base_dir)?;
        Self::apply_env_overrides(&mut config)?;
        Self::resolve_prompts(&mut config, base_dir).await?;

        config.validate()?;

        Ok(config)
    }

    fn resolve_environment(
        config: &mut AnalystConfig,
        base_dir: Option<&Path>,
    ) -> Result<(), AnalystError> {
        for env_file in &config.environment.env_files {
            let path = match base_dir {
                Some(dir) if env_file.is_relative() && !env_file.exists() => dir.join(env_file),
                _ => env_file.clone(),
            };
            if path.exists() {
                log::debug!("Loading environment file {}", path.display());
                Self::load_env_file(&path)?;
            }
        }

        for (key, value) in &config.environment.variables {
            env::set_var(key, value);
        }

        Self::resolve_llm_auth(&mut config.llm)?;
        Ok(())
    }

    /// Numeric and level overrides from the process environment.
    pub fn apply_env_overrides(config: &mut AnalystConfig) -> Result<(), AnalystError> {
        if let Ok(value) = env::var(MAX_ATTEMPTS_ENV) {
            config.session.max_attempts = value.trim().parse().map_err(|_| {
                AnalystError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    MAX_ATTEMPTS_ENV, value
                ))
            })?;
        }

        if let Ok(value) = env::var(EXEC_TIMEOUT_ENV) {
            config.session.exec_timeout_secs = value.trim().parse().map_err(|_| {
                AnalystError::ConfigError(format!(
                    "{} must be a number of seconds, got '{}'",
                    EXEC_TIMEOUT_ENV, value
                ))
            })?;
        }

        if let Ok(value) = env::var(LOG_LEVEL_ENV) {
            config.logging.level = value.trim().to_lowercase();
        }

        Ok(())
    }

    async fn resolve_prompts(
        config: &mut AnalystConfig,
        base_dir: Option<&Path>,
    ) -> Result<(), AnalystError> {
        let Some(file) = config.prompts.system_file.clone() else {
            return Ok(());
        };

        let path = match base_dir {
            Some(dir) if file.is_relative() => dir.join(&file),
            _ => file,
        };
        log::info!("Loading system prompt from file: {}", path.display());
        let content = fs::read_to_string(&path).await.map_err(|e| {
            AnalystError::ConfigError(format!(
                "Failed to read prompt file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.prompts.system = Some(content);
        Ok(())
    }

    fn load_env_file<P: AsRef<Path>>(path: P) -> Result<(), AnalystError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AnalystError::ConfigError(format!(
                "Failed to read env file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().trim_start_matches("export ").trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                // Variables already present in the process win over the file.
                if env::var_os(key).is_none() {
                    env::set_var(key, value);
                }
            }
        }

        Ok(())
    }

    /// Resolve LLM authentication from environment
    fn resolve_llm_auth(llm: &mut LlmConfig) -> Result<(), AnalystError> {
        if let Some(env_var) = &llm.auth.api_key_env {
            if let Ok(api_key) = env::var(env_var) {
                llm.auth.api_key = Some(api_key);
            }
        }

        if llm.auth.api_key.is_none() && llm.auth.api_key_env.is_none() {
            let fallback = match llm.provider {
                LlmProvider::Gemini => "GEMINI_API_KEY",
                LlmProvider::OpenAI | LlmProvider::Custom { .. } => "OPENAI_API_KEY",
            };
            if let Ok(api_key) = env::var(fallback) {
                llm.auth.api_key = Some(api_key);
            }
        }

        Ok(())
    }
}
