//! Retrying gateway in front of an [`LlmClient`].

use std::sync::Arc;
use std::time::Instant;

use super::error::{LlmError, RetryConfig};
use super::{ChatMessage, LlmClient, SamplingParams};

/// Sends a rendered prompt to the backend with bounded timeout and retry.
pub struct Gateway {
    client: Arc<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl Gateway {
    pub fn new(client: Arc<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            client,
            retry_config,
        }
    }

    /// Complete a system + user prompt and return the raw reply text.
    ///
    /// `Timeout` and `Unavailable` are retried until `max_attempts` calls have
    /// been made; `InvalidResponse` is returned immediately.
    pub async fn complete(
        &self,
        model: &str,
        system_message: &str,
        user_message: &str,
        params: &SamplingParams,
    ) -> Result<String, LlmError> {
        let messages = [
            ChatMessage::system(system_message),
            ChatMessage::user(user_message),
        ];
        let max_attempts = self.retry_config.max_attempts.max(1);
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(
                self.retry_config.timeout,
                self.client.chat_completion(model, &messages, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::timeout(format!(
                    "No reply within {:?}",
                    self.retry_config.timeout
                ))),
            };
            attempt += 1;

            let error = match result {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(
                            "Request succeeded after {} attempts (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(response.content);
                }
                Err(error) => error,
            };

            if !self.retry_config.should_retry(&error) {
                tracing::error!("Request failed (non-retryable): {}", error);
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    "Request failed after {} attempts (total time: {:?}): {}",
                    attempt,
                    start.elapsed(),
                    error
                );
                return Err(LlmError {
                    message: format!("{} (after {} attempts)", error.message, attempt),
                    ..error
                });
            }

            let delay = error.suggested_delay(attempt - 1, &self.retry_config);
            tracing::warn!(
                "Attempt {} failed with {}, retrying in {:?}: {}",
                attempt,
                error.kind,
                delay,
                error.message
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmErrorKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a scripted sequence of outcomes, repeating the last one.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _params: &SamplingParams,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };
            next.map(|content| ChatResponse {
                content,
                finish_reason: Some("stop".to_string()),
                usage: None,
                model: None,
            })
        }
    }

    struct HangingClient;

    #[async_trait]
    impl LlmClient for HangingClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _params: &SamplingParams,
        ) -> Result<ChatResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LlmError::unavailable("unreachable", None))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            timeout: Duration::from_secs(5),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_exact_attempt_count() {
        let client = ScriptedClient::new(vec![Err(LlmError::timeout("slow"))]);
        let gateway = Gateway::new(client.clone(), fast_retry(3));

        let err = gateway
            .complete("m", "sys", "user", &SamplingParams::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, LlmErrorKind::Timeout);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert!(err.message.contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::unavailable("down", None)),
            Ok("positive".to_string()),
        ]);
        let gateway = Gateway::new(client.clone(), fast_retry(3));

        let text = gateway
            .complete("m", "sys", "user", &SamplingParams::default())
            .await
            .unwrap();

        assert_eq!(text, "positive");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let client = ScriptedClient::new(vec![Err(LlmError::invalid_response("bad json"))]);
        let gateway = Gateway::new(client.clone(), fast_retry(5));

        let err = gateway
            .complete("m", "sys", "user", &SamplingParams::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, LlmErrorKind::InvalidResponse);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_backend_hits_attempt_timeout() {
        let config = RetryConfig {
            timeout: Duration::from_millis(100),
            ..fast_retry(2)
        };
        let gateway = Gateway::new(Arc::new(HangingClient), config);

        let err = gateway
            .complete("m", "sys", "user", &SamplingParams::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, LlmErrorKind::Timeout);
    }
}
