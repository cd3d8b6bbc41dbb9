use crate::config::LlmConfig;
use crate::core_types::{LLMResponse, Message, Role, Usage};
use crate::errors::AnalystError;
use crate::llm::providers::resolve_api_key;
use crate::llm::LLM;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: Option<String>,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    json_response: bool,
    reasoning_effort: Option<String>,
    headers: HashMap<String, String>,
}

impl OpenAIClient {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: OPENAI_API_BASE.to_string(),
            model,
            temperature: None,
            max_tokens: None,
            json_response: false,
            reasoning_effort: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Request `response_format: json_object`.
    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn build_request_body(&self, messages: &[Message]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(messages),
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }

        if self.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        if let Some(effort) = &self.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }

        body
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": self.format_role(&msg.role),
                    "content": msg.content
                })
            })
            .collect()
    }

    fn format_role(&self, role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse_response(&self, response: Value) -> Result<LLMResponse, AnalystError> {
        let choices = response["choices"]
            .as_array()
            .ok_or_else(|| AnalystError::ParsingError("No choices in response".to_string()))?;

        let choice = choices
            .first()
            .ok_or_else(|| AnalystError::ParsingError("Empty choices array".to_string()))?;

        let content = choice["message"]["content"].as_str().map(|s| s.to_string());
        if content.is_none() {
            return Err(AnalystError::ParsingError(
                "Response has no message content".to_string(),
            ));
        }

        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
        let usage = response.get("usage").map(|u| Usage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(LLMResponse {
            content,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LLM for OpenAIClient {
    async fn generate(&self, messages: Vec<Message>) -> Result<LLMResponse, AnalystError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(&messages);

        log::debug!(
            "OpenAI API request to {} with {} messages",
            url,
            messages.len()
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalystError::LLMError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| AnalystError::LLMError(format!("Failed to read response: {}", e)))?;

        log::debug!("OpenAI API response ({}): {}", status, response_text);

        if !status.is_success() {
            return Err(AnalystError::LLMError(format!(
                "API request failed with status {}: {}",
                status, response_text
            )));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|e| AnalystError::ParsingError(format!("Invalid JSON response: {}", e)))?;

        self.parse_response(response_json)
    }
}

fn configure(client: OpenAIClient, config: &LlmConfig) -> OpenAIClient {
    let mut client = client
        .with_temperature(config.parameters.temperature)
        .with_json_response(config.parameters.json_response)
        .with_reasoning_effort(config.parameters.reasoning_effort.clone())
        .with_headers(config.auth.headers.clone());
    if config.parameters.max_tokens > 0 {
        client = client.with_max_tokens(config.parameters.max_tokens);
    }
    client
}

/// Create an OpenAI LLM client from configuration
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LLM>, AnalystError> {
    let api_key = resolve_api_key(config, "OPENAI_API_KEY").ok_or_else(|| {
        AnalystError::ConfigError(
            "No API key found for OpenAI. Set api_key, api_key_env or OPENAI_API_KEY".to_string(),
        )
    })?;

    let client = OpenAIClient::new(Some(api_key), config.model.clone());
    Ok(Arc::new(configure(client, config)))
}

/// Create an OpenAI-compatible client for custom endpoints. Local servers often
/// run without authentication, so the key is optional here.
pub fn create_custom_client(
    config: &LlmConfig,
    base_url: &str,
) -> Result<Arc<dyn LLM>, AnalystError> {
    let api_key = resolve_api_key(config, "OPENAI_API_KEY");
    if api_key.is_none() {
        log::warn!("No API key configured for custom endpoint {}", base_url);
    }

    let client =
        OpenAIClient::new(api_key, config.model.clone()).with_api_base(base_url.to_string());
    Ok(Arc::new(configure(client, config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_client_creation() {
        let client = OpenAIClient::new(Some("test-key".to_string()), "gpt-4.1-mini".to_string())
            .with_temperature(0.0)
            .with_max_tokens(1000)
            .with_api_base("http://localhost:8080/v1/".to_string());

        assert_eq!(client.api_key.as_deref(), Some("test-key"));
        assert_eq!(client.model, "gpt-4.1-mini");
        assert_eq!(client.temperature, Some(0.0));
        assert_eq!(client.max_tokens, Some(1000));
        assert_eq!(client.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn test_request_body_requests_json_mode() {
        let client = OpenAIClient::new(None, "gpt-4.1-mini".to_string())
            .with_json_response(true)
            .with_reasoning_effort(Some("low".to_string()));
        let body = client.build_request_body(&[
            Message::system("You are a data analyst."),
            Message::user("How many rows?"),
        ]);

        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "How many rows?");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_parse_response_extracts_content_and_usage() {
        let client = OpenAIClient::new(None, "gpt-4.1-mini".to_string());
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "{\"code\": \"x = 1\"}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let parsed = client.parse_response(response).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("{\"code\": \"x = 1\"}"));
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_parse_response_without_content_fails() {
        let client = OpenAIClient::new(None, "gpt-4.1-mini".to_string());
        let response = json!({"choices": [{"message": {"role": "assistant", "content": null}}]});
        assert!(matches!(
            client.parse_response(response),
            Err(AnalystError::ParsingError(_))
        ));
    }
}
