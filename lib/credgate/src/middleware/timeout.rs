//! Per-attempt timeout middleware.
//!
//! The inner future is dropped when the deadline passes, which cancels the
//! in-flight transport call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tower::{Layer, Service};
use tracing::warn;

use crate::{Error, Request, Response, Result};

/// Layer that bounds each call with a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    /// Create a timeout layer.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            timeout: self.timeout,
        }
    }
}

/// Service that fails with [`Error::Timeout`] when its inner call is too slow.
#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request<Bytes>> for Timeout<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let timeout = self.timeout;
        let fut = self.inner.call(request);

        Box::pin(async move {
            tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "attempt timed out");
                Err(Error::Timeout)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tower::ServiceExt;

    use super::*;
    use crate::Method;

    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
        completed: Arc<AtomicBool>,
    }

    impl Service<Request<Bytes>> for SlowService {
        type Response = Response<Bytes>;
        type Error = Error;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request<Bytes>) -> Self::Future {
            let delay = self.delay;
            let completed = Arc::clone(&self.completed);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                completed.store(true, Ordering::SeqCst);
                Ok(Response::new(200, HashMap::new(), Bytes::new()))
            })
        }
    }

    fn slow(delay: Duration) -> SlowService {
        SlowService {
            delay,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn request() -> Request<Bytes> {
        let url = url::Url::parse("https://example.com/slow").expect("valid url");
        Request::builder(Method::GET, url).build()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_through() {
        let service = TimeoutLayer::new(Duration::from_secs(15)).layer(slow(Duration::from_secs(1)));

        let response = service.oneshot(request()).await.expect("response");
        assert_eq!(response.status(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_and_is_abandoned() {
        let inner = slow(Duration::from_secs(20));
        let completed = Arc::clone(&inner.completed);
        let service = TimeoutLayer::new(Duration::from_secs(15)).layer(inner);

        let err = service.oneshot(request()).await.expect_err("timeout");
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }
}
