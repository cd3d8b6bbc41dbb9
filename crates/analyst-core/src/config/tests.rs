//! Loader and validation tests

#[cfg(test)]
mod tests {
    use super::super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[tokio::test]
    #[serial]
    async fn test_empty_document_yields_defaults() {
        let config = ConfigLoader::from_str("", None).await.unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.session.max_attempts, 10);
        assert_eq!(config.session.exec_timeout_secs, 600);
        assert_eq!(config.session.task_file, "questions.txt");
        assert_eq!(config.runtime.venv_dir, ".venv");
        assert!(config.llm.parameters.json_response);
        assert_eq!(config.llm.parameters.temperature, 0.0);
    }

    #[tokio::test]
    #[serial]
    async fn test_sections_override_defaults() {
        let yaml = r#"
llm:
  provider: openai
  model: gpt-4.1-mini
  parameters:
    max_tokens: 2048
session:
  max_attempts: 3
  exec_timeout_secs: 30
  task_file: task.md
runtime:
  python: "3.12"
server:
  bind_addr: 0.0.0.0:9000
logging:
  level: debug
"#;
        let config = ConfigLoader::from_str(yaml, None).await.unwrap();

        assert_eq!(config.llm.provider, LlmProvider::OpenAI);
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert_eq!(config.llm.parameters.max_tokens, 2048);
        assert_eq!(config.session.max_attempts, 3);
        assert_eq!(config.session.exec_timeout().as_secs(), 30);
        assert_eq!(config.session.task_file, "task.md");
        assert_eq!(config.runtime.python.as_deref(), Some("3.12"));
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    #[serial]
    async fn test_zero_attempts_is_rejected() {
        let err = ConfigLoader::from_str("session:\n  max_attempts: 0\n", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[tokio::test]
    #[serial]
    async fn test_task_file_must_be_plain_name() {
        let err = ConfigLoader::from_str("session:\n  task_file: ../etc/passwd\n", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("task_file"));
    }

    #[test]
    fn test_custom_provider_requires_base_url() {
        let mut config = AnalystConfig::default();
        config.llm.provider = LlmProvider::Custom {
            base_url: "  ".to_string(),
        };
        assert!(config.validate().is_err());

        config.llm.provider = LlmProvider::Custom {
            base_url: "https://inference.example.com/v1".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides_win_over_file() {
        env::set_var(MAX_ATTEMPTS_ENV, "4");
        env::set_var(EXEC_TIMEOUT_ENV, "45");
        env::set_var(LOG_LEVEL_ENV, "WARN");

        let result = ConfigLoader::from_str("session:\n  max_attempts: 7\n", None).await;

        env::remove_var(MAX_ATTEMPTS_ENV);
        env::remove_var(EXEC_TIMEOUT_ENV);
        env::remove_var(LOG_LEVEL_ENV);

        let config = result.unwrap();
        assert_eq!(config.session.max_attempts, 4);
        assert_eq!(config.session.exec_timeout_secs, 45);
        assert_eq!(config.logging.level, "warn");
    }

    #[tokio::test]
    #[serial]
    async fn test_malformed_env_override_is_a_config_error() {
        env::set_var(MAX_ATTEMPTS_ENV, "many");
        let result = ConfigLoader::from_str("", None).await;
        env::remove_var(MAX_ATTEMPTS_ENV);

        assert!(matches!(result, Err(crate::errors::AnalystError::ConfigError(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_api_key_resolved_from_named_variable() {
        env::set_var("ANALYST_TEST_KEY", "sk-test");
        let yaml = "llm:\n  auth:\n    api_key_env: ANALYST_TEST_KEY\n";
        let result = ConfigLoader::from_str(yaml, None).await;
        env::remove_var("ANALYST_TEST_KEY");

        assert_eq!(result.unwrap().llm.auth.api_key.as_deref(), Some("sk-test"));
    }

    #[tokio::test]
    #[serial]
    async fn test_system_prompt_file_is_relative_to_config() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("system.md"), "You write pandas code.").unwrap();
        let config_path = dir.path().join("analyst.yaml");
        std::fs::write(&config_path, "prompts:\n  system_file: system.md\n").unwrap();

        let config = load_config(&config_path).await.unwrap();
        assert_eq!(config.prompts.system.as_deref(), Some("You write pandas code."));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_file_does_not_clobber_process_env() {
        let mut env_file = NamedTempFile::new().unwrap();
        writeln!(env_file, "# comment").unwrap();
        writeln!(env_file, "ANALYST_TEST_FROM_FILE=\"file-value\"").unwrap();
        writeln!(env_file, "ANALYST_TEST_PRESET=file-value").unwrap();
        env::set_var("ANALYST_TEST_PRESET", "process-value");

        let yaml = format!("environment:\n  env_files:\n    - {}\n", env_file.path().display());
        let result = ConfigLoader::from_str(&yaml, None).await;

        let from_file = env::var("ANALYST_TEST_FROM_FILE").ok();
        let preset = env::var("ANALYST_TEST_PRESET").ok();
        env::remove_var("ANALYST_TEST_FROM_FILE");
        env::remove_var("ANALYST_TEST_PRESET");

        assert!(result.is_ok());
        assert_eq!(from_file.as_deref(), Some("file-value"));
        assert_eq!(preset.as_deref(), Some("process-value"));
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("questions.txt"));
        assert!(is_plain_file_name(".venv"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("a/b.csv"));
        assert!(!is_plain_file_name("a\\b.csv"));
    }
}
