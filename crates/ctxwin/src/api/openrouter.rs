//! [`Summarizer`] backed by the OpenRouter chat-completions API.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::api::retry::{RetryConfig, is_transient_status};
use crate::context::condenser::{SummarizeFuture, Summarizer};
use crate::error::CondenseError;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for summaries: cheap and fast is what matters here.
pub const DEFAULT_SUMMARY_MODEL: &str = "google/gemini-2.5-flash";

/// Default cap on summary length.
pub const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 2048;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

const SUMMARY_TEMPERATURE: f32 = 0.3;

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// One failed attempt, classified for the retry loop.
#[derive(Debug)]
enum Attempt {
    Transient(String),
    Permanent(String),
}

// ── Client ─────────────────────────────────────────────────────────

/// Summarizes through OpenRouter with one stateless request per call.
pub struct OpenRouterSummarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_summary_tokens: u32,
    retry: RetryConfig,
    url: String,
}

impl OpenRouterSummarizer {
    /// Create a summarizer for `model` with the given API key.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("ctxwin/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            retry: RetryConfig::default(),
            url: OPENROUTER_URL.to_string(),
        })
    }

    /// Read the API key from `OPENROUTER_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| format!("{API_KEY_ENV} not set"))?;
        Self::new(api_key, model)
    }

    pub fn with_max_summary_tokens(mut self, tokens: u32) -> Self {
        self.max_summary_tokens = tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_summary_tokens,
            temperature: SUMMARY_TEMPERATURE,
        }
    }

    async fn attempt(&self, body: &ChatRequest<'_>) -> Result<String, Attempt> {
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "ctxwin")
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Attempt::Transient(format!("failed to read response: {e}")))?;
        debug!(
            "Summary response: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            let msg = format!("OpenRouter API HTTP {status}: {text}");
            return Err(if is_transient_status(status.as_u16()) {
                Attempt::Transient(msg)
            } else {
                Attempt::Permanent(msg)
            });
        }
        parse_completion(&text).map_err(Attempt::Permanent)
    }

    async fn summarize_with_retry(&self, prompt: &str) -> Result<String, CondenseError> {
        let body = self.request_body(prompt);
        debug!(
            "Summary request: model={}, prompt={} chars, max_tokens={}",
            self.model,
            prompt.len(),
            self.max_summary_tokens
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let mut attempt = 0;
        loop {
            match self.attempt(&body).await {
                Ok(summary) => return Ok(summary),
                Err(Attempt::Transient(msg)) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Summary request failed ({msg}); retry {}/{} in {delay:?}",
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Attempt::Transient(msg) | Attempt::Permanent(msg)) => {
                    return Err(CondenseError::Provider(msg));
                }
            }
        }
    }
}

impl Summarizer for OpenRouterSummarizer {
    fn summarize<'a>(&'a self, prompt: &'a str) -> SummarizeFuture<'a> {
        Box::pin(self.summarize_with_retry(prompt))
    }
}

impl std::fmt::Debug for OpenRouterSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterSummarizer")
            .field("model", &self.model)
            .field("max_summary_tokens", &self.max_summary_tokens)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Extract the summary text from a chat-completions response body.
fn parse_completion(text: &str) -> Result<String, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("OpenRouter API error: {}", err.message));
    }
    if let Some(ref usage) = parsed.usage {
        debug!(
            "Summary token usage: prompt={}, completion={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
        );
    }

    Ok(parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_shape() {
        let summarizer = OpenRouterSummarizer::new("key", "some/model")
            .unwrap()
            .with_max_summary_tokens(512);
        assert_eq!(summarizer.model(), "some/model");
        let body = serde_json::to_value(summarizer.request_body("PROMPT")).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "some/model",
                "messages": [{"role": "user", "content": "PROMPT"}],
                "max_tokens": 512,
                "temperature": 0.3f32,
            })
        );
    }

    #[test]
    fn parses_first_choice() {
        let text = r#"{
            "choices": [{"message": {"content": "the summary"}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 40}
        }"#;
        assert_eq!(parse_completion(text).unwrap(), "the summary");
    }

    #[test]
    fn missing_content_is_empty() {
        assert_eq!(parse_completion(r#"{"choices": []}"#).unwrap(), "");
        assert_eq!(
            parse_completion(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap(),
            ""
        );
    }

    #[test]
    fn api_error_is_reported() {
        let err = parse_completion(r#"{"error": {"message": "quota exceeded"}}"#).unwrap_err();
        assert_eq!(err, "OpenRouter API error: quota exceeded");
    }

    #[test]
    fn malformed_body_is_reported() {
        assert!(parse_completion("<html>").unwrap_err().starts_with("failed to parse"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_maps_to_provider_error() {
        let summarizer = OpenRouterSummarizer::new("key", "m")
            .unwrap()
            .with_retry(RetryConfig::none())
            .with_url("http://127.0.0.1:9/v1/chat/completions");
        let err = summarizer.summarize("prompt").await.unwrap_err();
        assert!(matches!(err, CondenseError::Provider(ref m) if m.starts_with("request failed")));
    }
}
