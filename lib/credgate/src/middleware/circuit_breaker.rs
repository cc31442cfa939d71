//! Circuit breaker middleware.
//!
//! After `failure_threshold` consecutive qualifying failures the circuit
//! opens and every call fails with [`Error::BrokenCircuit`] without reaching
//! the inner service. Once `break_duration` has elapsed a single trial call is
//! let through: success closes the circuit, failure reopens it.
//!
//! Qualifying failures are transient errors and the statuses 408, 429, 500,
//! 502, 503 and 504.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info, warn};

use super::RetryPolicy;
use crate::config::ResilienceConfig;
use crate::{Error, Request, Response, Result};

const CLOSED: u32 = 0;
const OPEN: u32 = 1;
const HALF_OPEN: u32 = 2;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// The break has elapsed; one trial call decides the next state.
    HalfOpen,
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive qualifying failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for CircuitBreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            break_duration: config.break_duration,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the break duration.
    #[must_use]
    pub const fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }
}

enum Admission {
    Allowed,
    Trial(TrialGuard),
    Rejected,
}

/// Shared breaker state.
#[derive(Debug)]
struct CircuitBreakerState {
    state: AtomicU32,
    failure_count: AtomicU32,
    /// Millis since `epoch` at which the circuit last opened.
    opened_at: AtomicU64,
    trial_in_flight: AtomicBool,
    epoch: Instant,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerState {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU32::new(CLOSED),
            failure_count: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            epoch: Instant::now(),
            config,
        }
    }

    fn get_state(&self) -> CircuitState {
        match self.state.load(Ordering::SeqCst) {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn admit(self: &Arc<Self>) -> Admission {
        match self.get_state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let opened_at = self.opened_at.load(Ordering::SeqCst);
                let elapsed = Duration::from_millis(self.now_millis().saturating_sub(opened_at));
                if elapsed < self.config.break_duration {
                    return Admission::Rejected;
                }
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    info!("circuit half-open, allowing a trial call");
                }
                self.try_trial()
            }
            CircuitState::HalfOpen => self.try_trial(),
        }
    }

    fn try_trial(self: &Arc<Self>) -> Admission {
        if self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Admission::Trial(TrialGuard(Arc::clone(self)))
        } else {
            Admission::Rejected
        }
    }

    fn open(&self) {
        self.opened_at.store(self.now_millis(), Ordering::SeqCst);
        self.state.store(OPEN, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
    }

    fn record_success(&self, trial: bool) {
        if trial {
            self.failure_count.store(0, Ordering::SeqCst);
            self.state.store(CLOSED, Ordering::SeqCst);
            info!("circuit closed");
        } else if self.get_state() == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, trial: bool) {
        if trial {
            self.open();
            warn!("trial call failed, circuit reopened");
            return;
        }
        if self.get_state() != CircuitState::Closed {
            return;
        }
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.failure_threshold
            && self
                .state
                .compare_exchange(CLOSED, OPEN, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.opened_at.store(self.now_millis(), Ordering::SeqCst);
            self.failure_count.store(0, Ordering::SeqCst);
            let break_ms = u64::try_from(self.config.break_duration.as_millis()).unwrap_or(u64::MAX);
            warn!(failures = count, break_ms, "circuit opened");
        }
    }

    /// `Some(true)` for a qualifying failure, `Some(false)` for a success and
    /// `None` for outcomes the breaker ignores (fatal errors, cancellation).
    fn is_failure(result: &Result<Response<Bytes>>) -> Option<bool> {
        match result {
            Ok(response) => {
                Some(RetryPolicy::should_retry_response(response) || response.status() == 500)
            }
            Err(error) if error.is_transient() => Some(true),
            Err(_) => None,
        }
    }
}

/// Releases the trial slot when the trial call finishes or is dropped.
struct TrialGuard(Arc<CircuitBreakerState>);

impl Drop for TrialGuard {
    fn drop(&mut self) {
        self.0.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

/// Layer that applies the circuit breaker pattern to requests.
///
/// All services produced by one layer share the same breaker state.
///
/// # Example
///
/// ```ignore
/// use credgate::middleware::{CircuitBreakerConfig, CircuitBreakerLayer};
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(3)
///     .with_break_duration(Duration::from_secs(60));
/// let layer = CircuitBreakerLayer::new(config);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    state: Arc<CircuitBreakerState>,
}

impl CircuitBreakerLayer {
    /// Create a new circuit breaker layer with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::new(config)),
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.state.get_state()
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreaker<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreaker {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Service that applies the circuit breaker pattern to requests.
#[derive(Debug, Clone)]
pub struct CircuitBreaker<S> {
    inner: S,
    state: Arc<CircuitBreakerState>,
}

impl<S> CircuitBreaker<S> {
    /// Current circuit state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.state.get_state()
    }
}

impl<S> Service<Request<Bytes>> for CircuitBreaker<S>
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
        let trial = match self.state.admit() {
            Admission::Allowed => None,
            Admission::Trial(guard) => Some(guard),
            Admission::Rejected => {
                warn!("circuit open, rejecting call");
                return Box::pin(async { Err(Error::BrokenCircuit) });
            }
        };

        let state = Arc::clone(&self.state);
        let fut = self.inner.call(request);

        Box::pin(async move {
            let result = fut.await;
            let is_trial = trial.is_some();

            match CircuitBreakerState::is_failure(&result) {
                Some(true) => state.record_failure(is_trial),
                Some(false) => state.record_success(is_trial),
                None => {}
            }
            drop(trial);

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    use tower::ServiceExt;

    use super::*;
    use crate::Method;

    /// Mock service answering from a script, repeating the last entry.
    /// `None` stands for a transient connection error.
    #[derive(Clone)]
    struct MockService {
        script: Arc<Vec<Option<u16>>>,
        call_count: Arc<AtomicU32>,
    }

    impl MockService {
        fn new(script: Vec<Option<u16>>) -> Self {
            Self {
                script: Arc::new(script),
                call_count: Arc::new(AtomicU32::new(0)),
            }
        }

        fn status(status: u16) -> Self {
            Self::new(vec![Some(status)])
        }

        fn failing() -> Self {
            Self::new(vec![None])
        }

        fn call_count(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl Service<Request<Bytes>> for MockService {
        type Response = Response<Bytes>;
        type Error = Error;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request<Bytes>) -> Self::Future {
            let index = self.call_count.fetch_add(1, Ordering::SeqCst);
            let entry = usize::try_from(index)
                .ok()
                .and_then(|index| self.script.get(index))
                .or_else(|| self.script.last())
                .copied()
                .flatten();

            Box::pin(async move {
                entry
                    .map(|status| Response::new(status, HashMap::new(), Bytes::new()))
                    .ok_or_else(|| Error::connection("mock error"))
            })
        }
    }

    fn create_request() -> Request<Bytes> {
        let url = url::Url::parse("https://example.com/test").expect("valid url");
        Request::builder(Method::GET, url).build()
    }

    fn layer() -> CircuitBreakerLayer {
        CircuitBreakerLayer::new(CircuitBreakerConfig::default())
    }

    async fn send(service: &mut CircuitBreaker<MockService>) -> Result<Response<Bytes>> {
        service.ready().await.expect("ready").call(create_request()).await
    }

    #[test]
    fn config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.break_duration, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn success_stays_closed() {
        let mock = MockService::status(200);
        let mut service = layer().layer(mock.clone());

        for _ in 0..5 {
            assert!(send(&mut service).await.is_ok());
            assert_eq!(service.circuit_state(), CircuitState::Closed);
        }
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_three_failures_and_fails_fast() {
        let mock = MockService::failing();
        let mut service = layer().layer(mock.clone());

        for i in 0..3 {
            let err = send(&mut service).await.expect_err("failure");
            assert!(err.is_connection(), "call {i}");
        }
        assert_eq!(service.circuit_state(), CircuitState::Open);

        let err = send(&mut service).await.expect_err("rejected");
        assert!(err.is_broken_circuit());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn qualifying_statuses_count_as_failures() {
        for status in [408, 429, 500, 502, 503, 504] {
            let mut service = layer().layer(MockService::status(status));
            for _ in 0..3 {
                assert!(send(&mut service).await.is_ok());
            }
            assert_eq!(service.circuit_state(), CircuitState::Open, "{status}");
        }
    }

    #[tokio::test]
    async fn other_statuses_do_not_open() {
        for status in [400, 401, 404, 501] {
            let mut service = layer().layer(MockService::status(status));
            for _ in 0..5 {
                let _ = send(&mut service).await;
            }
            assert_eq!(service.circuit_state(), CircuitState::Closed, "{status}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn trial_success_closes_circuit() {
        let mock = MockService::new(vec![None, None, None, Some(200)]);
        let mut service = layer().layer(mock.clone());

        for _ in 0..3 {
            let _ = send(&mut service).await;
        }
        assert_eq!(service.circuit_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(send(&mut service).await.expect_err("still open").is_broken_circuit());

        tokio::time::advance(Duration::from_secs(1)).await;
        let response = send(&mut service).await.expect("trial call");
        assert_eq!(response.status(), 200);
        assert_eq!(service.circuit_state(), CircuitState::Closed);
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens_circuit() {
        let mock = MockService::status(503);
        let mut service = layer().layer(mock.clone());

        for _ in 0..3 {
            let _ = send(&mut service).await;
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        let response = send(&mut service).await.expect("trial call");
        assert_eq!(response.status(), 503);
        assert_eq!(service.circuit_state(), CircuitState::Open);
        assert!(send(&mut service).await.expect_err("reopened").is_broken_circuit());
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_trial_call_at_a_time() {
        let mock = MockService::failing();
        let mut service = layer().layer(mock.clone());
        for _ in 0..3 {
            let _ = send(&mut service).await;
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        // Admit the trial but keep its future pending.
        let trial = service.ready().await.expect("ready").call(create_request());
        assert_eq!(service.circuit_state(), CircuitState::HalfOpen);
        assert!(send(&mut service).await.expect_err("busy").is_broken_circuit());

        // A dropped trial frees the slot.
        drop(trial);
        let err = send(&mut service).await.expect_err("second trial fails");
        assert!(err.is_connection());
        assert_eq!(service.circuit_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let mock = MockService::new(vec![None, None, Some(200), None, None, Some(200)]);
        let mut service = layer().layer(mock);

        for _ in 0..6 {
            let _ = send(&mut service).await;
            assert_eq!(service.circuit_state(), CircuitState::Closed);
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_ignored() {
        #[derive(Clone)]
        struct Misconfigured;

        impl Service<Request<Bytes>> for Misconfigured {
            type Response = Response<Bytes>;
            type Error = Error;
            type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _request: Request<Bytes>) -> Self::Future {
                Box::pin(async { Err(Error::missing_credentials(None, "client_id")) })
            }
        }

        let layer = layer();
        let service = layer.layer(Misconfigured);
        for _ in 0..5 {
            let err = service.clone().oneshot(create_request()).await.expect_err("fatal");
            assert!(err.is_configuration());
        }
        assert_eq!(layer.circuit_state(), CircuitState::Closed);
    }
}
