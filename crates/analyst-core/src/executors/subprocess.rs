//! Runs code units as child processes of the session interpreter.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::AnalystError;
use crate::executors::environment::{EnvironmentHandle, EnvironmentManager};
use crate::executors::{
    CapturedResult, CodeExecutor, ExecutionOutcome, ExecutionStatus, EXECUTION_ERROR_MARKER,
};

/// Variables forced on every execution so libraries stay headless and quiet.
pub const FORCED_ENV: &[(&str, &str)] = &[
    ("MPLBACKEND", "Agg"),
    ("TQDM_DISABLE", "1"),
    ("HF_HUB_DISABLE_PROGRESS_BARS", "1"),
];

/// Marks a result file whose value could not be encoded as JSON.
const UNSERIALIZABLE_PREFIX: &str = "!unserializable: ";

/// How long to wait for output pipes to drain once the child is gone.
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct SubprocessExecutor {
    environment: EnvironmentManager,
}

impl SubprocessExecutor {
    pub fn new(environment: EnvironmentManager) -> Self {
        Self { environment }
    }

    /// Appended to every code unit: serializes the `result` slot, if bound, to
    /// `result_path`. A value that is not JSON-representable is recorded as an
    /// `UNSERIALIZABLE_PREFIX` line instead of failing the run.
    fn result_epilogue(result_path: &Path) -> String {
        let literal = serde_json::to_string(&result_path.to_string_lossy())
            .unwrap_or_else(|_| "\"result.json\"".to_string());
        format!(
            r#"

import json as _analyst_json
if "result" in globals():
    try:
        _analyst_payload = _analyst_json.dumps(globals()["result"], allow_nan=False)
    except (TypeError, ValueError) as _analyst_exc:
        _analyst_payload = "{prefix}Result variable is not JSON serializable: %s" % _analyst_exc
    with open({literal}, "w", encoding="utf-8") as _analyst_fh:
        _analyst_fh.write(_analyst_payload)
"#,
            prefix = UNSERIALIZABLE_PREFIX,
            literal = literal
        )
    }

    fn spawn_reader<R>(reader: R) -> JoinHandle<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = Vec::new();
            if let Err(e) = reader.read_to_end(&mut buf).await {
                log::debug!("Output stream closed with error: {}", e);
            }
            buf
        })
    }

    async fn collect(mut handle: JoinHandle<Vec<u8>>) -> String {
        match tokio::time::timeout(STREAM_DRAIN_GRACE, &mut handle).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(e)) => {
                log::warn!("Output reader failed: {}", e);
                String::new()
            }
            Err(_) => {
                // A grandchild still holds the pipe open.
                handle.abort();
                String::new()
            }
        }
    }

    /// Read and remove the result file. The file is gone afterwards whether
    /// or not its content could be decoded.
    async fn take_result(result_path: &Path) -> Option<CapturedResult> {
        let read = tokio::fs::read(result_path).await;
        if !matches!(&read, Err(e) if e.kind() == std::io::ErrorKind::NotFound) {
            if let Err(e) = tokio::fs::remove_file(result_path).await {
                log::warn!(
                    "Failed to remove result file {}: {}",
                    result_path.display(),
                    e
                );
            }
        }

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => return Some(CapturedResult::Malformed(e.to_string())),
        };
        Some(decode_result(&bytes))
    }

    async fn execute(
        &self,
        environment: &EnvironmentHandle,
        script_path: &Path,
        deadline: Duration,
    ) -> Result<(String, String, ExecutionStatus), AnalystError> {
        let mut cmd = Command::new(environment.interpreter());
        cmd.arg(script_path)
            .current_dir(environment.workspace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in FORCED_ENV {
            cmd.env(key, value);
        }
        if let Some(venv) = environment.venv() {
            cmd.env("VIRTUAL_ENV", venv);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AnalystError::InternalError(format!(
                "Failed to start interpreter {}: {}",
                environment.interpreter().display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .map(Self::spawn_reader)
            .ok_or_else(|| AnalystError::InternalError("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .map(Self::spawn_reader)
            .ok_or_else(|| AnalystError::InternalError("child stderr not captured".to_string()))?;

        let status = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => ExecutionStatus::Succeeded,
            Ok(Ok(status)) => ExecutionStatus::Failed {
                exit_code: status.code(),
            },
            Ok(Err(e)) => {
                return Err(AnalystError::InternalError(format!(
                    "Failed to wait for child process: {}",
                    e
                )))
            }
            Err(_) => {
                log::warn!("Execution exceeded {:?}, killing child", deadline);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed-out child: {}", e);
                }
                ExecutionStatus::TimedOut
            }
        };

        let stdout = Self::collect(stdout).await;
        let stderr = Self::collect(stderr).await;
        Ok((stdout, stderr, status))
    }
}

fn decode_result(bytes: &[u8]) -> CapturedResult {
    let content = match std::str::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => return CapturedResult::Malformed(e.to_string()),
    };
    if let Some(reason) = content.strip_prefix(UNSERIALIZABLE_PREFIX) {
        return CapturedResult::Malformed(reason.to_string());
    }
    match serde_json::from_str(content) {
        Ok(value) => CapturedResult::Json(value),
        Err(e) => CapturedResult::Malformed(e.to_string()),
    }
}

pub fn timeout_message(deadline: Duration) -> String {
    if deadline.subsec_nanos() == 0 {
        format!("Code execution timed out after {} seconds.", deadline.as_secs())
    } else {
        format!(
            "Code execution timed out after {:.1} seconds.",
            deadline.as_secs_f64()
        )
    }
}

#[async_trait]
impl CodeExecutor for SubprocessExecutor {
    async fn run(
        &self,
        environment: &EnvironmentHandle,
        code: &str,
        dependencies: &[String],
        deadline: Duration,
    ) -> Result<ExecutionOutcome, AnalystError> {
        if let Err(failure) = self
            .environment
            .install_dependencies(environment, dependencies)
            .await
        {
            return Ok(ExecutionOutcome::install_failed(&failure));
        }

        let attempt_id = Uuid::new_v4();
        let result_path = environment
            .workspace()
            .join(format!(".result-{}.json", attempt_id));
        let script_path = environment
            .workspace()
            .join(format!(".attempt-{}.py", attempt_id));

        let mut script = String::with_capacity(code.len() + 512);
        script.push_str(code);
        script.push_str(&Self::result_epilogue(&result_path));
        tokio::fs::write(&script_path, script).await?;

        let executed = self.execute(environment, &script_path, deadline).await;

        // Collected on every path so no artifact outlives its attempt.
        let result = Self::take_result(&result_path).await;
        if let Err(e) = tokio::fs::remove_file(&script_path).await {
            log::warn!("Failed to remove script {}: {}", script_path.display(), e);
        }

        let (stdout, stderr, status) = executed?;
        let stderr = match &status {
            ExecutionStatus::Succeeded => stderr,
            ExecutionStatus::TimedOut => {
                format!("{}\n{}", EXECUTION_ERROR_MARKER, timeout_message(deadline))
            }
            _ => format!("{}\n{}", EXECUTION_ERROR_MARKER, stderr),
        };

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            result,
            status,
        })
    }
}
