//! Gateway error taxonomy and retry policy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure classes surfaced by the model gateway.
///
/// Only `Timeout` and `Unavailable` are transient; `InvalidResponse` means the
/// backend answered but the answer is unusable, so asking again won't help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    Timeout,
    Unavailable,
    InvalidResponse,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable)
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::InvalidResponse => write!(f, "InvalidResponse"),
        }
    }
}

/// Error returned by a single backend call or by the retrying gateway.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// Server-provided hint (Retry-After) for the next attempt.
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Timeout,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unavailable(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::Unavailable,
            message: message.into(),
            retry_after,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::InvalidResponse,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Delay before the next attempt: the server hint if any, else backoff.
    pub fn suggested_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        match self.retry_after {
            Some(hint) => hint.min(config.max_delay),
            None => config.backoff(attempt),
        }
    }
}

/// Map a non-success HTTP status to a gateway error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        408 | 504 => LlmErrorKind::Timeout,
        429 => LlmErrorKind::Unavailable,
        500..=599 => LlmErrorKind::Unavailable,
        _ => LlmErrorKind::InvalidResponse,
    }
}

/// Retry policy for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Backoff before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 10% random jitter to computed backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &LlmError) -> bool {
        error.kind.is_transient()
    }

    /// Exponential backoff for the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let jitter_ms = (delay.as_millis() as u64 / 10).max(1);
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }
}
