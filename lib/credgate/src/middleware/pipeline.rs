//! The resilience pipeline: circuit breaker, retry and timeout around a
//! transport, plus a registry caching one pipeline per distinct timeout.

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tower::ServiceBuilder;
use tower::retry::RetryLayer;
use tower::util::BoxCloneService;
use tracing::debug;

use super::{CircuitBreakerConfig, CircuitBreakerLayer, CircuitState, RetryPolicy, TimeoutLayer};
use crate::client::{BoxedService, SyncService};
use crate::config::ResilienceConfig;
use crate::{Request, Response, Result};

/// Composed resilience policy.
///
/// Outer to inner: circuit breaker, retry, per-attempt timeout, transport.
/// The breaker therefore observes the outcome after retries are exhausted,
/// and the timeout restarts for every attempt.
#[derive(Clone)]
pub struct ResiliencePipeline {
    service: SyncService,
    breaker: CircuitBreakerLayer,
    timeout: Duration,
}

impl std::fmt::Debug for ResiliencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("timeout", &self.timeout)
            .field("circuit_state", &self.circuit_state())
            .finish_non_exhaustive()
    }
}

impl ResiliencePipeline {
    /// Build a pipeline around `transport` with the configured default timeout.
    #[must_use]
    pub fn new(transport: BoxedService, config: &ResilienceConfig) -> Self {
        Self::with_timeout(transport, config, config.timeout)
    }

    /// Build a pipeline around `transport` with an explicit per-attempt timeout.
    #[must_use]
    pub fn with_timeout(transport: BoxedService, config: &ResilienceConfig, timeout: Duration) -> Self {
        let breaker = CircuitBreakerLayer::new(CircuitBreakerConfig::from(config));
        let service = ServiceBuilder::new()
            .layer(breaker.clone())
            .layer(RetryLayer::new(RetryPolicy::from_config(config)))
            .layer(TimeoutLayer::new(timeout))
            .service(transport);

        Self {
            service: SyncService::new(BoxCloneService::new(service)),
            breaker,
            timeout,
        }
    }

    /// Send a request through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the last attempt, [`crate::Error::Timeout`]
    /// if the last attempt timed out, or [`crate::Error::BrokenCircuit`] when the
    /// circuit is open. Non-success statuses are returned as responses.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.service.call(request).await
    }

    /// Current state of this pipeline's circuit breaker.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.circuit_state()
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Hands out the pipeline for a request's timeout.
///
/// Requests without a timeout override share the default pipeline. Each
/// distinct override gets its own pipeline, built once and reused, so its
/// breaker state persists across requests.
#[derive(Debug)]
pub struct PipelineRegistry {
    transport: SyncService,
    config: ResilienceConfig,
    default: ResiliencePipeline,
    by_timeout: DashMap<Duration, ResiliencePipeline>,
}

impl PipelineRegistry {
    /// Create a registry over `transport`.
    #[must_use]
    pub fn new(transport: BoxedService, config: ResilienceConfig) -> Self {
        let transport = SyncService::new(transport);
        let default = ResiliencePipeline::new(BoxCloneService::new(transport.clone()), &config);
        Self {
            transport,
            config,
            default,
            by_timeout: DashMap::new(),
        }
    }

    /// The default pipeline.
    #[must_use]
    pub const fn default_pipeline(&self) -> &ResiliencePipeline {
        &self.default
    }

    /// The pipeline for an optional timeout override.
    #[must_use]
    pub fn for_timeout(&self, timeout: Option<Duration>) -> ResiliencePipeline {
        match timeout {
            Some(timeout) if timeout != self.config.timeout => self
                .by_timeout
                .entry(timeout)
                .or_insert_with(|| {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    debug!(timeout_ms, "building pipeline for custom timeout");
                    ResiliencePipeline::with_timeout(
                        BoxCloneService::new(self.transport.clone()),
                        &self.config,
                        timeout,
                    )
                })
                .clone(),
            _ => self.default.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::task::{Context, Poll};

    use tower_service::Service;

    use super::*;
    use crate::{Error, Method};

    /// Transport answering from a script, repeating the last entry.
    /// `None` stands for a transient connection error.
    #[derive(Clone)]
    struct ScriptedTransport {
        script: Arc<Vec<Option<u16>>>,
        delay: Duration,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Option<u16>>) -> Self {
            Self {
                script: Arc::new(script),
                delay: Duration::ZERO,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(vec![Some(200)])
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn boxed(&self) -> BoxedService {
            BoxCloneService::new(self.clone())
        }
    }

    impl Service<Request<Bytes>> for ScriptedTransport {
        type Response = Response<Bytes>;
        type Error = Error;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request<Bytes>) -> Self::Future {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let entry = usize::try_from(index)
                .ok()
                .and_then(|index| self.script.get(index))
                .or_else(|| self.script.last())
                .copied()
                .flatten();
            let delay = self.delay;

            Box::pin(async move {
                tokio::time::sleep(delay).await;
                entry
                    .map(|status| Response::new(status, HashMap::new(), Bytes::new()))
                    .ok_or_else(|| Error::connection("connection reset"))
            })
        }
    }

    fn request() -> Request<Bytes> {
        let url = url::Url::parse("https://example.com/items").expect("valid url");
        Request::builder(Method::GET, url).build()
    }

    fn config() -> ResilienceConfig {
        ResilienceConfig::default().with_jitter(0, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let transport = ScriptedTransport::new(vec![None, Some(503), None, Some(429), Some(504), Some(200)]);
        let pipeline = ResiliencePipeline::new(transport.boxed(), &config());

        let response = pipeline.execute(request()).await.expect("response");
        assert_eq!(response.status(), 200);
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_retries() {
        let transport = ScriptedTransport::new(vec![Some(503)]);
        let pipeline = ResiliencePipeline::new(transport.boxed(), &config());

        let response = pipeline.execute(request()).await.expect("last response");
        assert_eq!(response.status(), 503);
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_client_errors() {
        let transport = ScriptedTransport::new(vec![Some(404)]);
        let pipeline = ResiliencePipeline::new(transport.boxed(), &config());

        let response = pipeline.execute(request()).await.expect("response");
        assert_eq!(response.status(), 404);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_sees_outcome_after_retries() {
        let transport = ScriptedTransport::new(vec![None]);
        let pipeline = ResiliencePipeline::new(transport.boxed(), &config());

        for _ in 0..3 {
            let err = pipeline.execute(request()).await.expect_err("exhausted");
            assert!(err.is_connection());
        }
        assert_eq!(transport.calls(), 18);
        assert_eq!(pipeline.circuit_state(), CircuitState::Open);

        let err = pipeline.execute(request()).await.expect_err("fail fast");
        assert!(err.is_broken_circuit());
        assert_eq!(transport.calls(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_applies_per_attempt() {
        let transport = ScriptedTransport::slow(Duration::from_secs(20));
        let pipeline = ResiliencePipeline::new(transport.boxed(), &config().with_max_retries(0));

        let err = pipeline.execute(request()).await.expect_err("timeout");
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_reuses_pipelines_per_timeout() {
        let transport = ScriptedTransport::new(vec![Some(200)]);
        let registry = PipelineRegistry::new(transport.boxed(), config());

        assert_eq!(registry.for_timeout(None).timeout(), Duration::from_secs(15));
        assert_eq!(
            registry.for_timeout(Some(Duration::from_secs(15))).timeout(),
            Duration::from_secs(15)
        );

        let custom = registry.for_timeout(Some(Duration::from_secs(30)));
        assert_eq!(custom.timeout(), Duration::from_secs(30));
        assert_eq!(registry.by_timeout.len(), 1);

        let _ = registry.for_timeout(Some(Duration::from_secs(30)));
        assert_eq!(registry.by_timeout.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_timeout_pipeline_keeps_its_breaker_state() {
        let transport = ScriptedTransport::new(vec![None]);
        let registry = PipelineRegistry::new(transport.boxed(), config().with_max_retries(0));
        let timeout = Some(Duration::from_secs(30));

        for _ in 0..3 {
            let _ = registry.for_timeout(timeout).execute(request()).await;
        }

        assert_eq!(registry.for_timeout(timeout).circuit_state(), CircuitState::Open);
        assert_eq!(registry.default_pipeline().circuit_state(), CircuitState::Closed);
    }
}
