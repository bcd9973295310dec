use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::capabilities::Capabilities;
use crate::error::HelixError;
use crate::request::CompletionRequest;
use crate::response::{CompletionResponse, StreamChunk};

/// Vendor model identifier, e.g. `"claude-3-5-sonnet-20241022"`.
pub type ModelId = String;

/// The one abstraction boundary the specification requires (§9): every
/// vendor implements this trait once, and nothing downstream of the
/// Registry needs to know which vendor it is talking to.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier for this provider, e.g. `"claude"`, `"groq"`.
    fn provider_id(&self) -> &str;

    /// Single-shot completion; blocks until a terminal `CompletionResponse`
    /// or a `HelixError`. Implementations honor the caller's deadline via
    /// `tokio::time::timeout` at the call site, not inside the adapter.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError>;

    /// Streaming completion; the returned stream is finite and
    /// non-restartable. Dropping the stream must close the upstream
    /// connection promptly (within 100 ms, §5).
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, HelixError>;

    /// Cheap liveness check; must not exceed `HEALTH_PROBE_TIMEOUT`.
    async fn health_probe(&self) -> Result<(), HelixError>;

    /// Pure, cached capability lookup for a given model id.
    fn capabilities(&self, model_id: &str) -> Capabilities;

    /// Validates adapter configuration; called once at construction.
    fn validate_config(&self) -> Result<(), HelixError>;

    /// Lists models this adapter can serve, used by the Verifier's
    /// discovery phase. Vendors without a listing endpoint return a
    /// static list.
    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError>;
}

/// Upper bound on `health_probe` latency (§4.1).
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Adapter-level retry policy: only `ConnectionFailed` and transient
/// `InternalProviderError` are retried, at most twice, with full-jitter
/// exponential backoff starting at 200 ms (§4.1). `RateLimited` is never
/// retried here — it is surfaced so a caller can honor `Retry-After`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter backoff for the given (zero-indexed) retry attempt:
    /// a uniform random delay in `[0, base_delay * 2^attempt]`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let cap_ms = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jittered = rand::random::<u64>() % cap_ms.max(1);
        Duration::from_millis(jittered)
    }
}

/// Runs `op` under the adapter retry policy: retries only when the
/// returned error's kind is adapter-retryable, sleeping a full-jitter
/// backoff between attempts. The final attempt's error (retryable or
/// not) is returned unchanged if every attempt fails.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, HelixError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, HelixError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && err.kind().is_adapter_retryable() => {
                tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_connection_failed_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), HelixError> = with_retry(RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HelixError::ConnectionFailed("boom".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_rate_limited() {
        let calls = AtomicU32::new(0);
        let result: Result<(), HelixError> = with_retry(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(HelixError::RateLimited { retry_after_ms: Some(500) }) }
        })
        .await;
        assert!(matches!(result, Err(e) if e.kind() == ErrorKind::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
