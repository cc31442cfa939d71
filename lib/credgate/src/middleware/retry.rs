//! Retry policy for [`tower::retry::Retry`].
//!
//! Retries transient transport failures and the statuses 408, 429, 502, 503
//! and 504. Before attempt `n` it sleeps for the server's `Retry-After` delta
//! (when present) plus a random jitter drawn from
//! `[base_delay_ms, 2^n * multiplier_ms)`.

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tower::retry::Policy;
use tracing::debug;

use crate::config::ResilienceConfig;
use crate::{Error, Request, Response};

/// Statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 5] = [408, 429, 502, 503, 504];

/// Jitter bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Jitter {
    base_ms: u64,
    multiplier_ms: u64,
}

impl Jitter {
    fn delay(self, attempt: u32) -> Duration {
        let upper = 2_u64
            .saturating_pow(attempt)
            .saturating_mul(self.multiplier_ms);
        if upper <= self.base_ms {
            return Duration::from_millis(self.base_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.base_ms..upper))
    }
}

/// Retry policy with jittered exponential backoff.
///
/// The policy value held by the layer is never mutated: tower clones it for
/// every request, so the attempt counter is per request.
///
/// # Example
///
/// ```ignore
/// use credgate::middleware::{RetryLayer, RetryPolicy, ServiceBuilder};
///
/// let service = ServiceBuilder::new()
///     .layer(RetryLayer::new(RetryPolicy::new(5)))
///     .service(client);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    attempt: u32,
    jitter: Jitter,
}

impl RetryPolicy {
    /// Create a policy with the given retry count and default jitter.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self::from_config(&ResilienceConfig::default().with_max_retries(max_retries))
    }

    /// Create a policy from a [`ResilienceConfig`].
    #[must_use]
    pub const fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt: 0,
            jitter: Jitter {
                base_ms: config.base_delay_ms,
                multiplier_ms: config.multiplier_ms,
            },
        }
    }

    /// Returns `true` if the response status should be retried.
    pub(crate) fn should_retry_response(response: &Response<Bytes>) -> bool {
        RETRYABLE_STATUSES.contains(&response.status())
    }

    /// Returns `true` if the error should be retried.
    pub(crate) const fn should_retry_error(error: &Error) -> bool {
        error.is_transient()
    }
}

impl Policy<Request<Bytes>, Response<Bytes>, Error> for RetryPolicy {
    type Future = tokio::time::Sleep;

    fn retry(
        &mut self,
        _req: &mut Request<Bytes>,
        result: &mut Result<Response<Bytes>, Error>,
    ) -> Option<Self::Future> {
        if self.attempt >= self.max_retries {
            return None;
        }

        let server_delay = match result {
            Ok(response) if Self::should_retry_response(response) => {
                response.retry_after().unwrap_or_default()
            }
            Err(error) if Self::should_retry_error(error) => Duration::ZERO,
            _ => return None,
        };

        self.attempt += 1;
        let delay = server_delay + self.jitter.delay(self.attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(response) => debug!(
                attempt = self.attempt,
                status = response.status(),
                delay_ms,
                "retrying after retryable status"
            ),
            Err(error) => debug!(
                attempt = self.attempt,
                error = %error,
                delay_ms,
                "retrying after transient error"
            ),
        }

        Some(tokio::time::sleep(delay))
    }

    fn clone_request(&mut self, req: &Request<Bytes>) -> Option<Request<Bytes>> {
        Some(req.clone())
    }
}
