//! Retry policy for remote model calls.
//!
//! Providers classify every failure as [`ProviderError::Transient`]
//! (HTTP 429, 5xx, connection errors, timeouts) or
//! [`ProviderError::Fatal`] (other 4xx, malformed responses). The policy
//! retries transient failures with exponential backoff and gives up with
//! [`ProviderError::RetriesExhausted`]; a fatal failure returns at once.
//!
//! Backoff: `base`, `2 × base`, `4 × base`, ... capped at `32 × base`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Fatal(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ProviderError {
    /// Classify an HTTP status that was not a success.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("{} API error {}: {}", service, status, body);
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Transient(msg)
        } else {
            ProviderError::Fatal(msg)
        }
    }

    /// Connection failures and timeouts are retried; a bad request is not.
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_decode() {
            ProviderError::Fatal(format!("{}: {}", service, err))
        } else {
            ProviderError::Transient(format!("{}: {}", service, err))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out.
    ///
    /// `on_retry` is called before each retry sleep so callers can count
    /// retries.
    pub async fn run<T, F, Fut, R>(&self, mut op: F, mut on_retry: R) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        R: FnMut(u32, &ProviderError),
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::Transient(msg)) => {
                    if attempt >= self.max_retries {
                        return Err(ProviderError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: msg,
                        });
                    }
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    let err = ProviderError::Transient(msg);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    on_retry(attempt, &err);
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 1)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(32));
        assert_eq!(policy.delay_for(20), Duration::from_secs(32));
    }

    #[test]
    fn status_classification() {
        let e = ProviderError::from_status("OpenAI", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(e, ProviderError::Transient(_)));
        let e = ProviderError::from_status("OpenAI", reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(matches!(e, ProviderError::Transient(_)));
        let e = ProviderError::from_status("OpenAI", reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(e, ProviderError::Fatal(ref m) if m.contains("bad key")));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let mut retries = 0;
        let out = fast(3)
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(ProviderError::Transient("503".into()))
                        } else {
                            Ok(7)
                        }
                    }
                },
                |_, _| retries += 1,
            )
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let calls = AtomicU32::new(0);
        let err = fast(2)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ProviderError::Transient("429".into())) }
                },
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ProviderError::Fatal("400".into())) }
                },
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
