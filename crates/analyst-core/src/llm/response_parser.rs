//! Extraction of a `CodeUnit` from raw completion text.
//!
//! Models asked for JSON still wrap it in Markdown fences or prose now and then,
//! so parsing tries the trimmed text, then a fenced block, then the outermost
//! braces.

use crate::core_types::CodeUnit;
use crate::errors::AnalystError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GeneratedCode {
    code: String,
    #[serde(default, alias = "dependencies", alias = "required_packages")]
    libraries: Vec<String>,
    #[serde(default, alias = "is_final")]
    is_final_answer: bool,
}

pub struct ResponseParser;

impl ResponseParser {
    pub fn parse_code_unit(content: &str) -> Result<CodeUnit, AnalystError> {
        let mut last_error = None;
        for candidate in Self::candidates(content) {
            match serde_json::from_str::<GeneratedCode>(candidate) {
                Ok(generated) => {
                    let dependencies = generated
                        .libraries
                        .into_iter()
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect();
                    return Ok(CodeUnit::new(
                        generated.code,
                        dependencies,
                        generated.is_final_answer,
                    ));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(AnalystError::ParsingError(match last_error {
            Some(e) => format!("Response is not a valid code object: {}", e),
            None => "Response is empty".to_string(),
        }))
    }

    fn candidates(content: &str) -> Vec<&str> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let mut candidates = vec![trimmed];
        if let Some(fenced) = Self::strip_fence(trimmed) {
            candidates.push(fenced);
        }
        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if start < end {
                candidates.push(&trimmed[start..=end]);
            }
        }
        candidates
    }

    fn strip_fence(text: &str) -> Option<&str> {
        let start = text.find("```")?;
        let after_open = &text[start + 3..];
        // Skip the info string, e.g. ```json
        let body_start = after_open.find('\n')? + 1;
        let body = &after_open[body_start..];
        let end = body.find("```")?;
        Some(body[..end].trim())
    }
}
