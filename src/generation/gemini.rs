//! Gemini client for interview question suggestions
//!
//! Calls the `generateContent` endpoint with a JSON response schema so the
//! model answers with a plain array of questions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;

use super::{check_input, fallback_questions, GeneratedQuestion, GenerationError, QuestionGenerator};

const GEMINI_MODEL: &str = "gemini-2.5-flash";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Global HTTP client for reuse across requests
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            })
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Get the Gemini API key from the environment
fn get_api_key() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|key| !key.is_empty())
}

/// Check if an API key is configured (for status display)
pub fn is_api_key_configured() -> bool {
    get_api_key().is_some()
}

pub struct GeminiQuestionGenerator {
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

impl GeminiQuestionGenerator {
    /// Read the API key from `GEMINI_API_KEY` or `API_KEY`.
    pub fn from_env() -> Self {
        Self::with_api_key(get_api_key())
    }

    pub fn with_api_key(api_key: Option<String>) -> Self {
        Self {
            api_key,
            endpoint: GEMINI_ENDPOINT.to_string(),
            model: GEMINI_MODEL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(role: &str, count: u32) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [{
                    "text": format!("Generate {} interview questions for a {} position.", count, role.trim())
                }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "text": {
                                "type": "STRING",
                                "description": "The interview question text"
                            },
                            "prepTimeSeconds": {
                                "type": "INTEGER",
                                "description": "Recommended preparation time in seconds (e.g. 30, 60)"
                            },
                            "maxAnswerTimeSeconds": {
                                "type": "INTEGER",
                                "description": "Recommended max answer time in seconds (e.g. 120, 180)"
                            }
                        },
                        "required": ["text", "prepTimeSeconds", "maxAnswerTimeSeconds"]
                    }
                }
            }
        })
    }
}

/// Extract the question array from a `generateContent` response body.
/// A response without text yields no questions.
fn parse_response(body: &str) -> Result<Vec<GeneratedQuestion>, GenerationError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Parse(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&text).map_err(|e| GenerationError::Parse(e.to_string()))
}

#[async_trait]
impl QuestionGenerator for GeminiQuestionGenerator {
    async fn generate(
        &self,
        role: &str,
        count: u32,
    ) -> Result<Vec<GeneratedQuestion>, GenerationError> {
        check_input(role, count)?;

        let Some(api_key) = &self.api_key else {
            log::warn!("Gemini API key is missing, returning canned questions");
            return Ok(fallback_questions(role));
        };

        let url = format!("{}/{}:generateContent", self.endpoint, self.model);
        let response = get_http_client()
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(role, count))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(error_response) => error_response.error.message,
                Err(_) => body,
            };
            log::error!("Gemini API error ({}): {}", status.as_u16(), message);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let questions = parse_response(&body)?;
        log::debug!("Gemini returned {} questions", questions.len());
        Ok(questions)
    }
}
