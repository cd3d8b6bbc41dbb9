//! The generate, execute and repair loop.
//!
//! One `Orchestrator::run` drives one session: it asks the oracle for code,
//! executes it, and either stops or feeds the failure output back as the next
//! prompt. The loop is strictly sequential and bounded by `max_attempts`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::core_types::{CodeUnit, Conversation, Message};
use crate::errors::AnalystError;
use crate::executors::{CapturedResult, CodeExecutor, EnvironmentHandle, ExecutionOutcome};
use crate::oracle::CodeOracle;
use crate::prompts;
use crate::trace::{AttemptRecord, SessionSummary, SessionTraceHandler};

const FEEDBACK_LOG_EXCERPT: usize = 500;
const EMPTY_OUTPUT_NOTE: &str = "(the script finished without printing anything)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: usize,
    pub max_attempts: usize,
    pub last_feedback: Option<String>,
}

impl RetryState {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_feedback: None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

enum LoopState {
    AwaitingCode { prompt: String },
    Executing { unit: CodeUnit },
    Retrying { feedback: String, is_error: bool },
    Success(Value),
    Failed(AnalystError),
}

pub struct Orchestrator {
    oracle: Arc<dyn CodeOracle>,
    executor: Arc<dyn CodeExecutor>,
    max_attempts: usize,
    deadline: Duration,
    trace_handler: Option<Arc<dyn SessionTraceHandler>>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn CodeOracle>,
        executor: Arc<dyn CodeExecutor>,
        max_attempts: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            oracle,
            executor,
            max_attempts,
            deadline,
            trace_handler: None,
        }
    }

    pub fn with_trace_handler(mut self, handler: Arc<dyn SessionTraceHandler>) -> Self {
        self.trace_handler = Some(handler);
        self
    }

    /// Run the loop until an answer is decoded or the session fails.
    /// `conversation` holds the turns so far; `task_prompt` opens the loop.
    pub async fn run(
        &self,
        session_id: Uuid,
        environment: &EnvironmentHandle,
        conversation: Conversation,
        task_prompt: String,
    ) -> Result<Value, AnalystError> {
        let started = Instant::now();
        let mut retry = RetryState::new(self.max_attempts);
        let result = self
            .drive(session_id, environment, conversation, task_prompt, &mut retry)
            .await;

        if let Some(handler) = &self.trace_handler {
            handler.on_session_complete(&SessionSummary {
                session_id,
                attempts: retry.attempt,
                succeeded: result.is_ok(),
                error_category: result.as_ref().err().map(|e| e.category().to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        result
    }

    async fn drive(
        &self,
        session_id: Uuid,
        environment: &EnvironmentHandle,
        mut conversation: Conversation,
        task_prompt: String,
        retry: &mut RetryState,
    ) -> Result<Value, AnalystError> {
        let mut state = LoopState::AwaitingCode {
            prompt: task_prompt,
        };

        loop {
            state = match state {
                LoopState::AwaitingCode { prompt } => {
                    conversation.push(Message::user(prompt));
                    self.request_code(&mut conversation, retry.attempt == 0).await
                }
                LoopState::Executing { unit } => {
                    retry.attempt += 1;
                    log::info!(
                        "Session {}: attempt {}/{}",
                        session_id,
                        retry.attempt,
                        retry.max_attempts
                    );
                    self.execute(session_id, environment, unit, retry).await
                }
                LoopState::Retrying { feedback, is_error } => LoopState::AwaitingCode {
                    prompt: prompts::feedback_prompt(&feedback, is_error),
                },
                LoopState::Success(answer) => {
                    log::info!(
                        "Session {}: final answer after {} attempt(s)",
                        session_id,
                        retry.attempt
                    );
                    return Ok(answer);
                }
                LoopState::Failed(err) => {
                    log::error!("Session {}: {}", session_id, err);
                    return Err(err);
                }
            };
        }
    }

    async fn request_code(&self, conversation: &mut Conversation, initial: bool) -> LoopState {
        let failure = if initial {
            "LLM failed to generate initial code."
        } else {
            "LLM failed to refine code."
        };

        match self.oracle.generate(std::mem::take(conversation)).await {
            Ok(reply) => {
                *conversation = reply.conversation;
                match reply.code_unit {
                    Some(unit) if unit.is_usable() => LoopState::Executing { unit },
                    Some(_) => LoopState::Failed(AnalystError::OracleError(format!(
                        "{} The reply contained no code.",
                        failure
                    ))),
                    None => LoopState::Failed(AnalystError::OracleError(format!(
                        "{} The reply was not a usable code object.",
                        failure
                    ))),
                }
            }
            Err(e) => LoopState::Failed(AnalystError::OracleError(format!("{} {}", failure, e))),
        }
    }

    async fn execute(
        &self,
        session_id: Uuid,
        environment: &EnvironmentHandle,
        unit: CodeUnit,
        retry: &mut RetryState,
    ) -> LoopState {
        let started = Instant::now();
        let outcome = match self
            .executor
            .run(environment, &unit.code, &unit.dependencies, self.deadline)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return LoopState::Failed(e),
        };

        let succeeded = !outcome.has_error() && unit.is_final;
        let feedback = (!succeeded).then(|| feedback_text(&outcome));
        self.record_attempt(
            session_id,
            retry.attempt,
            &unit,
            &outcome,
            feedback.as_deref(),
            started,
        );

        let Some(feedback) = feedback else {
            return match decode_answer(outcome.result) {
                Ok(answer) => LoopState::Success(answer),
                Err(e) => LoopState::Failed(e),
            };
        };

        let is_error = outcome.has_error();
        if is_error {
            log::warn!(
                "Session {}: attempt {} failed: {}",
                session_id,
                retry.attempt,
                excerpt(&feedback)
            );
        } else {
            log::info!(
                "Session {}: attempt {} needs refinement",
                session_id,
                retry.attempt
            );
        }

        retry.last_feedback = Some(feedback.clone());
        if retry.exhausted() {
            return LoopState::Failed(AnalystError::BudgetExceeded {
                attempts: retry.attempt,
                last_feedback: feedback,
            });
        }

        LoopState::Retrying { feedback, is_error }
    }

    fn record_attempt(
        &self,
        session_id: Uuid,
        attempt: usize,
        unit: &CodeUnit,
        outcome: &ExecutionOutcome,
        feedback: Option<&str>,
        started: Instant,
    ) {
        let Some(handler) = &self.trace_handler else {
            return;
        };
        handler.on_attempt_complete(&AttemptRecord {
            session_id,
            attempt,
            is_final: unit.is_final,
            dependencies: unit.dependencies.clone(),
            status: outcome.status.label(),
            feedback_excerpt: feedback.map(excerpt),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

fn feedback_text(outcome: &ExecutionOutcome) -> String {
    let text = outcome.feedback();
    if text.trim().is_empty() {
        EMPTY_OUTPUT_NOTE.to_string()
    } else {
        text.to_string()
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(FEEDBACK_LOG_EXCERPT).collect()
}

/// Decode the final `result` into the answer value.
///
/// The generated code is told to store `json.dumps(answer)`, so a string is
/// parsed once more; any other JSON value is the answer as-is.
pub fn decode_answer(result: Option<CapturedResult>) -> Result<Value, AnalystError> {
    match result {
        None => Err(AnalystError::ResultDecodeError(
            "final code did not assign a `result` value".to_string(),
        )),
        Some(malformed @ CapturedResult::Malformed(_)) => Err(AnalystError::ResultDecodeError(
            malformed.into_value().to_string(),
        )),
        Some(CapturedResult::Json(Value::String(encoded))) => serde_json::from_str(&encoded)
            .map_err(|e| {
                AnalystError::ResultDecodeError(format!("result string is not valid JSON: {}", e))
            }),
        Some(CapturedResult::Json(value)) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{ExecutionStatus, EXECUTION_ERROR_MARKER};
    use crate::oracle::OracleReply;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedOracle {
        replies: Mutex<VecDeque<Option<CodeUnit>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Option<CodeUnit>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CodeOracle for ScriptedOracle {
        async fn generate(
            &self,
            mut conversation: Conversation,
        ) -> Result<OracleReply, AnalystError> {
            let prompt = conversation.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            let code_unit = self.replies.lock().unwrap().pop_front().flatten();
            conversation.push(Message::assistant("{}"));
            Ok(OracleReply {
                conversation,
                code_unit,
            })
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl CodeOracle for FailingOracle {
        async fn generate(&self, _conversation: Conversation) -> Result<OracleReply, AnalystError> {
            Err(AnalystError::LLMError("503 Service Unavailable".to_string()))
        }
    }

    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<ExecutionOutcome>>,
        runs: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<ExecutionOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CodeExecutor for ScriptedExecutor {
        async fn run(
            &self,
            _environment: &EnvironmentHandle,
            _code: &str,
            _dependencies: &[String],
            _deadline: Duration,
        ) -> Result<ExecutionOutcome, AnalystError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| failed("out of script")))
        }
    }

    fn failed(message: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: String::new(),
            stderr: format!("{}\n{}", EXECUTION_ERROR_MARKER, message),
            result: None,
            status: ExecutionStatus::Failed { exit_code: Some(1) },
        }
    }

    fn succeeded(stdout: &str, result: Option<Value>) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            result: result.map(CapturedResult::Json),
            status: ExecutionStatus::Succeeded,
        }
    }

    fn malformed(stdout: &str, details: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            result: Some(CapturedResult::Malformed(details.to_string())),
            status: ExecutionStatus::Succeeded,
        }
    }

    fn unit(code: &str, is_final: bool) -> Option<CodeUnit> {
        Some(CodeUnit::new(code, vec![], is_final))
    }

    fn environment() -> EnvironmentHandle {
        EnvironmentHandle::with_interpreter(std::env::temp_dir(), PathBuf::from("python3"))
    }

    async fn run(
        oracle: Arc<dyn CodeOracle>,
        executor: Arc<dyn CodeExecutor>,
        max_attempts: usize,
    ) -> Result<Value, AnalystError> {
        Orchestrator::new(oracle, executor, max_attempts, Duration::from_secs(5))
            .run(
                Uuid::new_v4(),
                &environment(),
                Conversation::with_system_prompt("sys"),
                "How many rows?".to_string(),
            )
            .await
    }

    #[tokio::test]
    async fn test_repairs_after_failure() {
        let oracle = ScriptedOracle::new(vec![unit("A", false), unit("B", true)]);
        let executor = ScriptedExecutor::new(vec![failed("boom"), succeeded("", Some(json!(5)))]);

        let answer = run(oracle.clone(), executor.clone(), 10).await.unwrap();

        assert_eq!(answer, json!(5));
        assert_eq!(oracle.calls(), 2);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        let prompts = oracle.prompts.lock().unwrap();
        assert_eq!(prompts[0], "How many rows?");
        assert!(prompts[1].contains("boom"));
    }

    #[tokio::test]
    async fn test_budget_is_a_hard_ceiling() {
        let oracle = ScriptedOracle::new((0..10).map(|_| unit("x", true)).collect());
        let executor =
            ScriptedExecutor::new((0..10).map(|i| failed(&format!("boom {}", i))).collect());

        let err = run(oracle.clone(), executor.clone(), 3).await.unwrap_err();

        match err {
            AnalystError::BudgetExceeded {
                attempts,
                last_feedback,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_feedback.ends_with("boom 2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(oracle.calls(), 3);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_code_unit_fails_without_executing() {
        let oracle = ScriptedOracle::new(vec![None]);
        let executor = ScriptedExecutor::new(vec![]);

        let err = run(oracle.clone(), executor.clone(), 10).await.unwrap_err();

        assert!(matches!(
            err,
            AnalystError::OracleError(ref m) if m.starts_with("LLM failed to generate initial")
        ));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oracle_error_on_refinement_ignores_budget() {
        let oracle = ScriptedOracle::new(vec![unit("A", true), unit("   ", true)]);
        let executor = ScriptedExecutor::new(vec![failed("boom")]);

        let err = run(oracle, executor.clone(), 10).await.unwrap_err();

        assert!(matches!(
            err,
            AnalystError::OracleError(ref m) if m.starts_with("LLM failed to refine code.")
        ));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_oracle_error() {
        let executor = ScriptedExecutor::new(vec![]);
        let err = run(Arc::new(FailingOracle), executor, 10).await.unwrap_err();
        assert_eq!(err.category(), crate::errors::ErrorCategory::Oracle);
    }

    #[tokio::test]
    async fn test_malformed_final_result_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![unit("A", true), unit("B", true)]);
        let executor = ScriptedExecutor::new(vec![
            succeeded("", Some(json!("{not json"))),
            succeeded("", Some(json!(1))),
        ]);

        let err = run(oracle.clone(), executor.clone(), 10).await.unwrap_err();

        assert!(matches!(err, AnalystError::ResultDecodeError(_)));
        assert_eq!(oracle.calls(), 1);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_final_clean_run_is_refined_with_stdout() {
        let oracle = ScriptedOracle::new(vec![unit("explore", false), unit("answer", true)]);
        let executor = ScriptedExecutor::new(vec![
            succeeded("columns: a, b", None),
            succeeded("", Some(json!("[1, 2]"))),
        ]);

        let answer = run(oracle.clone(), executor, 10).await.unwrap();

        assert_eq!(answer, json!([1, 2]));
        assert!(oracle.prompts.lock().unwrap()[1].contains("columns: a, b"));
    }

    #[tokio::test]
    async fn test_silent_non_final_run_gets_placeholder_feedback() {
        let oracle = ScriptedOracle::new(vec![unit("explore", false), unit("answer", true)]);
        let executor = ScriptedExecutor::new(vec![
            succeeded("", None),
            succeeded("", Some(json!({"a": 1}))),
        ]);

        run(oracle.clone(), executor, 10).await.unwrap();

        assert!(oracle.prompts.lock().unwrap()[1].contains(EMPTY_OUTPUT_NOTE));
    }

    #[tokio::test]
    async fn test_unserializable_final_result_ends_session() {
        let oracle = ScriptedOracle::new(vec![unit("result = {1, 2}", true), unit("B", true)]);
        let executor = ScriptedExecutor::new(vec![
            malformed("", "Object of type set is not JSON serializable"),
            succeeded("", Some(json!(7))),
        ]);

        let err = run(oracle.clone(), executor.clone(), 10).await.unwrap_err();

        assert!(matches!(err, AnalystError::ResultDecodeError(ref d) if d.contains("type set")));
        assert_eq!(oracle.calls(), 1);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unserializable_exploration_result_keeps_stdout() {
        let oracle = ScriptedOracle::new(vec![unit("explore", false), unit("answer", true)]);
        let executor = ScriptedExecutor::new(vec![
            malformed("columns: a, b", "Object of type DataFrame is not JSON serializable"),
            succeeded("", Some(json!(2))),
        ]);

        let answer = run(oracle.clone(), executor, 10).await.unwrap();

        assert_eq!(answer, json!(2));
        assert!(oracle.prompts.lock().unwrap()[1].contains("columns: a, b"));
    }

    #[tokio::test]
    async fn test_oracle_failure_counts_no_attempts() {
        struct Recorder(Mutex<Vec<usize>>);

        impl SessionTraceHandler for Recorder {
            fn on_attempt_complete(&self, _record: &AttemptRecord) {}

            fn on_session_complete(&self, summary: &SessionSummary) {
                self.0.lock().unwrap().push(summary.attempts);
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let err = Orchestrator::new(
            Arc::new(FailingOracle),
            ScriptedExecutor::new(vec![]),
            10,
            Duration::from_secs(5),
        )
        .with_trace_handler(recorder.clone())
        .run(
            Uuid::new_v4(),
            &environment(),
            Conversation::new(),
            "task".to_string(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.category(), crate::errors::ErrorCategory::Oracle);
        assert_eq!(*recorder.0.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_decode_answer() {
        assert_eq!(
            decode_answer(Some(CapturedResult::Json(json!("{\"a\": 1}")))).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            decode_answer(Some(CapturedResult::Json(json!([1, "two"])))).unwrap(),
            json!([1, "two"])
        );
        assert!(decode_answer(None).is_err());
        match decode_answer(Some(CapturedResult::Malformed("eof".to_string()))) {
            Err(AnalystError::ResultDecodeError(detail)) => {
                let detail: Value = serde_json::from_str(&detail).unwrap();
                assert_eq!(detail["error"], "Failed to deserialize result variable");
                assert_eq!(detail["details"], "eof");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
        assert!(decode_answer(Some(CapturedResult::Json(json!("plain words")))).is_err());
    }
}
