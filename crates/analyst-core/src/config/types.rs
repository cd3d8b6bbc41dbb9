//! Configuration type definitions
//!
//! Every section is optional; a completely empty YAML document yields a working
//! configuration (Gemini provider, ten attempts, ten-minute execution deadline).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalystConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub auth: LlmAuth,
}

/// LLM provider types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    /// Any OpenAI-compatible chat-completions endpoint.
    Custom {
        base_url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Ask the provider for a JSON-only response body.
    #[serde(default = "default_true")]
    pub json_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmAuth {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Limits of one analysis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
    /// Name of the uploaded file holding the natural-language task.
    #[serde(default = "default_task_file")]
    pub task_file: String,
    /// Parent directory for session workspaces; the system temp dir when unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl SessionConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Python runtime provisioning through `uv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub uv_path: Option<PathBuf>,
    #[serde(default = "default_venv_dir")]
    pub venv_dir: String,
    /// Interpreter request passed to `uv venv --python`.
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
}

impl RuntimeConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    /// Allowed origins; any origin when unset.
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptConfig {
    /// Inline replacement for the built-in system prompt.
    #[serde(default)]
    pub system: Option<String>,
    /// File holding the system prompt, relative to the config file.
    #[serde(default)]
    pub system_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default = "default_env_files")]
    pub env_files: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_provider() -> LlmProvider { LlmProvider::Gemini }
fn default_model() -> String { "gemini-2.5-flash".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_true() -> bool { true }
fn default_max_attempts() -> usize { 10 }
fn default_exec_timeout() -> u64 { 600 }
fn default_task_file() -> String { "questions.txt".to_string() }
fn default_venv_dir() -> String { ".venv".to_string() }
fn default_install_timeout() -> u64 { 600 }
fn default_bind_addr() -> String { "127.0.0.1:8000".to_string() }
fn default_request_timeout() -> u64 { 900 }
fn default_max_body_size() -> usize { 50 * 1024 * 1024 }
fn default_env_files() -> Vec<PathBuf> { vec![PathBuf::from(".env")] }
fn default_log_level() -> String { "info".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            parameters: ModelParameters::default(),
            auth: LlmAuth::default(),
        }
    }
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            json_response: true,
            reasoning_effort: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            exec_timeout_secs: default_exec_timeout(),
            task_file: default_task_file(),
            workspace_root: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            uv_path: None,
            venv_dir: default_venv_dir(),
            python: None,
            install_timeout_secs: default_install_timeout(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
            enable_cors: true,
            cors_origins: None,
            enable_logging: true,
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            variables: HashMap::new(),
            env_files: default_env_files(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}
