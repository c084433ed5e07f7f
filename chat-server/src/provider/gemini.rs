//! Google Gemini `generateContent` client.

use super::{CompletionClient, CompletionRequest, CompletionSettings, ProviderError, Role};
use async_trait::async_trait;
use chat_common::util::{sanitize_for_log, truncate_with_ellipsis};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER: &str = "gemini";

/// Upper bound on error body text kept in a `ProviderError`.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Gemini client bound to one model and API key.
pub struct GeminiClient {
    settings: CompletionSettings,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn new(role: Option<&'static str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<i64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<i64>,
}

impl GeminiClient {
    pub fn new(settings: CompletionSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { settings, client }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::new(PROVIDER, &self.settings.model, message)
    }

    fn endpoint(&self) -> String {
        let model = self.settings.model.trim_start_matches("models/");
        format!(
            "{}/v1beta/models/{model}:generateContent?key={}",
            self.settings.base_url, self.settings.api_key
        )
    }

    fn build_request<'a>(&self, request: &'a CompletionRequest) -> GenerateContentRequest<'a> {
        let mut contents: Vec<Content<'a>> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                Content::new(Some(role), &turn.text)
            })
            .collect();
        contents.push(Content::new(Some("user"), &request.message));

        let system_instruction = (!request.system.is_empty()).then(|| Content::new(None, &request.system));

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_tokens,
            },
        }
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let start = Instant::now();
        let body = self.build_request(&request);

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(format!("Request failed: {}", sanitize_for_log(&e.to_string()))))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| truncate_with_ellipsis(&text, MAX_ERROR_BODY_CHARS));
            return Err(self
                .error(format!("API error ({}): {}", status.as_u16(), detail))
                .with_status(status.as_u16()));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {e}")))?;

        if let Some(err) = result.error {
            return Err(self.error(format!("API error: {}", err.message)));
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| self.error("No response from Gemini"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(self.error(format!(
                "Empty response from Gemini (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let (input_tokens, output_tokens) = result
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or_default();

        tracing::debug!(
            model = %self.settings.model,
            turns = request.history.len(),
            input_tokens,
            output_tokens,
            latency_ms = start.elapsed().as_millis() as u64,
            "Gemini completion succeeded"
        );

        Ok(text)
    }
}
