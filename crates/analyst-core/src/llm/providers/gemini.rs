//! Google Gemini API client implementation
//!
//! Talks to the native `generateContent` endpoint. System turns become the
//! `systemInstruction`, assistant turns are sent with the `model` role.

use crate::config::LlmConfig;
use crate::core_types::{LLMResponse, Message, Role, Usage};
use crate::errors::AnalystError;
use crate::llm::providers::resolve_api_key;
use crate::llm::LLM;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API client
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    json_response: bool,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: Client::new(),
            base_url: GEMINI_API_BASE.to_string(),
            temperature: 0.0,
            max_output_tokens: 4096,
            json_response: true,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Ask for `application/json` as the response MIME type.
    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u32>,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetails {
    code: u16,
    message: String,
}

impl GeminiClient {
    fn convert_messages_to_gemini_contents(
        &self,
        messages: Vec<Message>,
    ) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for message in messages {
            let text_part = vec![GeminiPart {
                text: Some(message.content),
            }];
            match message.role {
                Role::System => {
                    // Use the last system message as system instruction
                    system_instruction = Some(GeminiContent {
                        role: None,
                        parts: text_part,
                    });
                }
                Role::User => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: text_part,
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts: text_part,
                }),
            }
        }

        (system_instruction, contents)
    }

    fn build_request(&self, messages: Vec<Message>) -> GeminiRequest {
        let (system_instruction, contents) = self.convert_messages_to_gemini_contents(messages);
        GeminiRequest {
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: self
                    .json_response
                    .then(|| "application/json".to_string()),
            },
            system_instruction,
        }
    }

    fn convert_gemini_response_to_llm(
        &self,
        response: GeminiResponse,
    ) -> Result<LLMResponse, AnalystError> {
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            AnalystError::ParsingError("No candidates in Gemini response".to_string())
        })?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AnalystError::ParsingError(format!(
                "Gemini response has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count.unwrap_or(0),
            completion_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        });

        Ok(LLMResponse {
            content: Some(text),
            finish_reason: candidate.finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LLM for GeminiClient {
    async fn generate(&self, messages: Vec<Message>) -> Result<LLMResponse, AnalystError> {
        let request = self.build_request(messages);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        log::debug!("Gemini API request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalystError::LLMError(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(gemini_error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(AnalystError::LLMError(format!(
                    "Gemini API error {}: {}",
                    gemini_error.error.code, gemini_error.error.message
                )));
            }

            return Err(AnalystError::LLMError(format!(
                "Gemini API request failed with status {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            AnalystError::ParsingError(format!("Failed to parse Gemini response: {}", e))
        })?;

        self.convert_gemini_response_to_llm(gemini_response)
    }
}

/// Create a Gemini LLM client from configuration
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LLM>, AnalystError> {
    let api_key = resolve_api_key(config, "GEMINI_API_KEY").ok_or_else(|| {
        AnalystError::ConfigError(
            "No API key found for Gemini. Set GEMINI_API_KEY environment variable or provide api_key in config"
                .to_string(),
        )
    })?;

    let client = GeminiClient::new(api_key, config.model.clone())
        .with_temperature(config.parameters.temperature)
        .with_max_output_tokens(config.parameters.max_tokens)
        .with_json_response(config.parameters.json_response);

    Ok(Arc::new(client))
}
