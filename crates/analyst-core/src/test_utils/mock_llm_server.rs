// src/test_utils/mock_llm_server.rs
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::core_types::Message;
use crate::errors::AnalystError;
use serde::{Deserialize, Serialize};

/// The parts of a chat-completions request the tests inspect.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MockChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub response_format: Option<Value>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone)]
struct MockServerState {
    responses: Arc<Mutex<VecDeque<Result<String, AnalystError>>>>,
    requests: Arc<Mutex<Vec<MockChatRequest>>>,
}

impl MockServerState {
    fn new(responses: Vec<Result<String, AnalystError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn chat_completions_handler(
    axum::extract::State(state): axum::extract::State<MockServerState>,
    Json(payload): Json<MockChatRequest>,
) -> Result<Json<Value>, axum::http::StatusCode> {
    log::debug!("Mock LLM server received {} messages", payload.messages.len());
    state.requests.lock().unwrap().push(payload);

    match state.responses.lock().unwrap().pop_front() {
        Some(Ok(content)) => Ok(Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))),
        Some(Err(e)) => {
            log::error!("Mock LLM server simulating an error: {:?}", e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
        None => {
            log::error!("Mock LLM server ran out of responses!");
            Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// OpenAI-compatible chat-completions endpoint serving canned replies.
pub struct MockLLMServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    pub recorded_requests: Arc<Mutex<Vec<MockChatRequest>>>,
}

impl MockLLMServer {
    pub async fn start(responses: Vec<Result<String, AnalystError>>) -> Self {
        let state = MockServerState::new(responses);
        let recorded_requests_clone = state.requests.clone();

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock LLM server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("Mock LLM server error: {}", e);
                });
        });

        MockLLMServer {
            addr,
            shutdown_tx,
            recorded_requests: recorded_requests_clone,
        }
    }

    /// Base URL to hand to an OpenAI-compatible client.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock LLM server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    pub fn get_requests(&self) -> Vec<MockChatRequest> {
        self.recorded_requests.lock().unwrap().clone()
    }
}
