//! The seam between HTTP and the analysis engine.

use analyst_core::{AnalystError, InputFile, SessionRunner};
use async_trait::async_trait;
use serde_json::Value;

/// Anything that can turn uploaded inputs into an answer.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle_query(&self, inputs: Vec<InputFile>) -> Result<Value, AnalystError>;
}

#[async_trait]
impl QueryHandler for SessionRunner {
    async fn handle_query(&self, inputs: Vec<InputFile>) -> Result<Value, AnalystError> {
        self.run(inputs).await
    }
}
