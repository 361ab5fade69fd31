//! OpenAI-compatible chat-completions client (vLLM, TGI, OpenAI, ...).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{classify_http_status, LlmError, LlmErrorKind};
use super::{ChatMessage, ChatResponse, LlmClient, SamplingParams, TokenUsage};

/// Chat-completions client for a single backend base URL.
///
/// Performs exactly one HTTP request per call; retry belongs to the gateway.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8080/v1`).
    ///
    /// `timeout` bounds each request at the HTTP layer as well.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Create an LlmError from HTTP response status and body.
    fn create_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> LlmError {
        let message = format!("Backend returned HTTP {}: {}", status.as_u16(), truncate(body, 500));
        match classify_http_status(status.as_u16()) {
            LlmErrorKind::Timeout => LlmError::timeout(message),
            LlmErrorKind::Unavailable => LlmError::unavailable(message, retry_after),
            LlmErrorKind::InvalidResponse => LlmError::invalid_response(message),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<ChatResponse, LlmError> {
        let request = CompletionRequest {
            model,
            messages,
            params,
        };

        tracing::debug!("Sending chat completion: model={} url={}", model, self.endpoint());

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(LlmError::timeout(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(LlmError::unavailable(format!("Connection failed: {}", e), None));
                } else {
                    return Err(LlmError::unavailable(format!("Request failed: {}", e), None));
                }
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return Err(LlmError::timeout(format!("Timed out reading body: {}", e)))
            }
            Err(e) => {
                return Err(LlmError::unavailable(format!("Failed to read body: {}", e), None))
            }
        };

        if !status.is_success() {
            return Err(Self::create_error(status, &body, retry_after));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::invalid_response(format!(
                "Failed to parse response: {}, body: {}",
                e,
                truncate(&body, 500)
            ))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::invalid_response("No choices in response"))?;

        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::invalid_response("Choice has no message content"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        if let Some(u) = &usage {
            tracing::debug!(
                "Completion usage: prompt={} completion={} total={}",
                u.prompt_tokens,
                u.completion_tokens,
                u.total_tokens
            );
        }

        Ok(ChatResponse {
            content,
            finish_reason: choice.finish_reason,
            usage,
            model: parsed.model.or_else(|| Some(model.to_string())),
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Chat-completions request body.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    params: &'a SamplingParams,
}

/// Chat-completions response body.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Usage data (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flattens_sampling_params() {
        let messages = vec![ChatMessage::system("judge"), ChatMessage::user("text")];
        let params = SamplingParams {
            max_tokens: Some(500),
            temperature: Some(0.1),
            ..SamplingParams::default()
        };
        let body = serde_json::to_value(CompletionRequest {
            model: "mistral",
            messages: &messages,
            params: &params,
        })
        .unwrap();

        assert_eq!(body["model"], "mistral");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = OpenAiClient::new("http://localhost:8080/v1/", None, Duration::from_secs(5));
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_error_classification_from_status() {
        let err = OpenAiClient::create_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "busy", None);
        assert_eq!(err.kind, LlmErrorKind::Unavailable);
        let err = OpenAiClient::create_error(reqwest::StatusCode::GATEWAY_TIMEOUT, "", None);
        assert_eq!(err.kind, LlmErrorKind::Timeout);
        let err = OpenAiClient::create_error(reqwest::StatusCode::BAD_REQUEST, "bad", None);
        assert_eq!(err.kind, LlmErrorKind::InvalidResponse);
    }
}
