//! Automatic retry with exponential backoff and jitter.
//!
//! Retries transient completion failures (429, 500, 502, 503, 504, network
//! timeouts) with configurable exponential backoff. Authentication and
//! request-configuration errors are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CompletionError, CompletionErrorKind, Error};

/// Retry policy applied to every completion call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
    /// Error kinds that may be retried.
    pub retryable: Vec<CompletionErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
            retryable: vec![CompletionErrorKind::RateLimited, CompletionErrorKind::Gateway],
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Whether this policy retries the given error.
    pub fn is_retryable(&self, error: &CompletionError) -> bool {
        self.retryable.contains(&error.kind())
    }
}

/// Map an HTTP status and/or error text onto a [`CompletionError`].
pub fn classify_failure(status: Option<u16>, detail: &str) -> CompletionError {
    let detail = detail.to_string();
    match status {
        Some(429) => return CompletionError::RateLimited(detail),
        Some(401) | Some(403) => return CompletionError::Authentication(detail),
        Some(s) if s >= 500 => return CompletionError::Gateway(detail),
        Some(s) if s >= 400 => return CompletionError::Configuration(detail),
        _ => {}
    }

    let lower = detail.to_lowercase();
    if lower.contains("rate limit") {
        CompletionError::RateLimited(detail)
    } else if ["unauthorized", "invalid api key", "authentication"]
        .iter()
        .any(|p| lower.contains(p))
    {
        CompletionError::Authentication(detail)
    } else if [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "broken pipe",
        "network",
        "bad gateway",
        "overloaded",
    ]
    .iter()
    .any(|p| lower.contains(p))
    {
        CompletionError::Gateway(detail)
    } else {
        CompletionError::InvalidResponse(detail)
    }
}

/// Run `call` until it succeeds, a non-retryable error occurs, or the retry
/// budget is spent.
///
/// Retryable errors that outlive the budget surface as
/// [`Error::TransientCompletion`]; anything else as [`Error::Completion`].
pub async fn retry_call<T, F, Fut>(config: &RetryConfig, mut call: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if config.is_retryable(&e) => {
                if attempt >= config.max_retries {
                    return Err(Error::TransientCompletion {
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient API error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(Error::Completion(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(retries: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::ZERO,
            ..RetryConfig::with_retries(retries)
        }
    }

    #[test]
    fn default_config_no_retries() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 0);
        assert!(config.retryable.contains(&CompletionErrorKind::RateLimited));
        assert!(!config.retryable.contains(&CompletionErrorKind::Authentication));
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_reduces_delay() {
        let jittered = RetryConfig::with_retries(3);
        let plain = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(3)
        };
        assert!(jittered.delay_for_attempt(2) <= plain.delay_for_attempt(2));
    }

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            classify_failure(Some(429), "OpenRouter API HTTP 429: rate limited"),
            CompletionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(Some(502), "OpenRouter API HTTP 502: bad gateway"),
            CompletionError::Gateway(_)
        ));
        assert!(matches!(
            classify_failure(Some(401), "OpenRouter API HTTP 401: unauthorized"),
            CompletionError::Authentication(_)
        ));
        assert!(matches!(
            classify_failure(Some(400), "OpenRouter API HTTP 400: unknown model"),
            CompletionError::Configuration(_)
        ));
    }

    #[test]
    fn classifies_transport_text() {
        assert!(matches!(
            classify_failure(None, "request failed: connection reset"),
            CompletionError::Gateway(_)
        ));
        assert!(matches!(
            classify_failure(None, "some random error"),
            CompletionError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_call(&instant(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CompletionError::RateLimited("429".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_escalate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = retry_call(&instant(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CompletionError::Gateway("503".into())) }
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::TransientCompletion { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = retry_call(&instant(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CompletionError::Authentication("401".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Completion(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
