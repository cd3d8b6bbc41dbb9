// src/trace.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pass through generate, install and execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: Uuid,
    pub attempt: usize,
    pub is_final: bool,
    pub dependencies: Vec<String>,
    pub status: String,
    pub feedback_excerpt: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub attempts: usize,
    pub succeeded: bool,
    pub error_category: Option<String>,
    pub duration_ms: u64,
}

/// Observer for session progress. Handlers are shared by concurrent sessions
/// and must not block.
pub trait SessionTraceHandler: Send + Sync {
    fn on_attempt_complete(&self, record: &AttemptRecord);

    fn on_session_complete(&self, summary: &SessionSummary);
}

/// Writes one log line per attempt and per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceHandler;

impl SessionTraceHandler for LogTraceHandler {
    fn on_attempt_complete(&self, record: &AttemptRecord) {
        log::info!(
            "session={} attempt={} final={} status={} deps={:?} duration_ms={}",
            record.session_id,
            record.attempt,
            record.is_final,
            record.status,
            record.dependencies,
            record.duration_ms
        );
    }

    fn on_session_complete(&self, summary: &SessionSummary) {
        match &summary.error_category {
            None => log::info!(
                "session={} succeeded after {} attempt(s) in {} ms",
                summary.session_id,
                summary.attempts,
                summary.duration_ms
            ),
            Some(category) => log::warn!(
                "session={} failed ({}) after {} attempt(s) in {} ms",
                summary.session_id,
                category,
                summary.attempts,
                summary.duration_ms
            ),
        }
    }
}
