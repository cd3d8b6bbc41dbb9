//! Session boundary: inputs in, decoded answer or categorized error out.

use std::sync::Arc;

use serde_json::Value;

use crate::config::AnalystConfig;
use crate::core_types::{Conversation, InputFile};
use crate::errors::AnalystError;
use crate::executors::{CodeExecutor, EnvironmentManager, SessionWorkspace, SubprocessExecutor};
use crate::llm::create_llm_client;
use crate::oracle::{CodeOracle, LlmCodeOracle};
use crate::orchestrator::Orchestrator;
use crate::prompts;
use crate::trace::{LogTraceHandler, SessionTraceHandler};

/// Runs complete analysis sessions. Cheap to share: every session gets its own
/// workspace, environment and conversation.
pub struct SessionRunner {
    config: AnalystConfig,
    oracle: Arc<dyn CodeOracle>,
    executor: Arc<dyn CodeExecutor>,
    environments: EnvironmentManager,
    system_prompt: String,
    trace_handler: Option<Arc<dyn SessionTraceHandler>>,
}

impl SessionRunner {
    pub fn new(
        config: AnalystConfig,
        oracle: Arc<dyn CodeOracle>,
        executor: Arc<dyn CodeExecutor>,
        environments: EnvironmentManager,
    ) -> Self {
        let system_prompt = config
            .prompts
            .system
            .clone()
            .unwrap_or_else(|| prompts::DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            config,
            oracle,
            executor,
            environments,
            system_prompt,
            trace_handler: Some(Arc::new(LogTraceHandler)),
        }
    }

    /// Production wiring: configured LLM provider, `uv` environments and
    /// subprocess execution.
    pub fn from_config(config: AnalystConfig) -> Result<Self, AnalystError> {
        let llm = create_llm_client(&config.llm)?;
        let environments = EnvironmentManager::new(&config.runtime);
        let executor = Arc::new(SubprocessExecutor::new(environments.clone()));
        Ok(Self::new(
            config,
            Arc::new(LlmCodeOracle::new(llm)),
            executor,
            environments,
        ))
    }

    pub fn with_trace_handler(mut self, handler: Option<Arc<dyn SessionTraceHandler>>) -> Self {
        self.trace_handler = handler;
        self
    }

    pub fn config(&self) -> &AnalystConfig {
        &self.config
    }

    /// Run one session. The workspace is removed before this returns, on
    /// every path, and also if the future is dropped midway.
    pub async fn run(&self, inputs: Vec<InputFile>) -> Result<Value, AnalystError> {
        let workspace = SessionWorkspace::acquire(
            self.config.session.workspace_root.as_deref(),
            &[self.environments.venv_dir()],
        )?;
        let session_id = workspace.id();
        log::info!("Session {} started with {} input(s)", session_id, inputs.len());

        let result = self.run_in(&workspace, inputs).await;

        if let Err(e) = workspace.close() {
            log::warn!("Session {} workspace cleanup failed: {}", session_id, e);
        }
        if let Err(e) = &result {
            log::debug!("Session {} ended with {}: {}", session_id, e.category(), e);
        }
        result
    }

    async fn run_in(
        &self,
        workspace: &SessionWorkspace,
        inputs: Vec<InputFile>,
    ) -> Result<Value, AnalystError> {
        let file_names = workspace.write_inputs(inputs).await?;
        let task = workspace.read_task(&self.config.session.task_file).await?;
        let environment = self.environments.ensure_environment(workspace).await?;

        let mut orchestrator = Orchestrator::new(
            self.oracle.clone(),
            self.executor.clone(),
            self.config.session.max_attempts,
            self.config.session.exec_timeout(),
        );
        if let Some(handler) = &self.trace_handler {
            orchestrator = orchestrator.with_trace_handler(handler.clone());
        }

        orchestrator
            .run(
                workspace.id(),
                &environment,
                Conversation::with_system_prompt(self.system_prompt.clone()),
                prompts::initial_prompt(&task, &file_names),
            )
            .await
    }
}
