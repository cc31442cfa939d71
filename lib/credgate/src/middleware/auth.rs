//! Client-credentials authentication middleware.
//!
//! For a request carrying a scope and no caller `Authorization` header the
//! middleware attaches a cached bearer token, acquiring one when needed. If
//! the target answers 401 to a token the middleware attached, the token is
//! refreshed and the request resent exactly once. Every outbound call,
//! token exchanges included, goes through the resilience pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower::util::BoxCloneService;
use tower_service::Service;
use tracing::{Instrument, debug, info, info_span};

use super::{PipelineRegistry, ResiliencePipeline};
use crate::acquirer::TokenAcquirer;
use crate::client::{BoxedService, with_cancellation};
use crate::config::{AuthConfig, ResilienceConfig};
use crate::token_cache::{CacheKey, TokenCache};
use crate::{AUTHORIZATION, Error, Request, Response, Result};

/// Mutual-exclusion gate serializing token refreshes.
///
/// Each middleware owns one by default. Clone it into several layers to make
/// them share a single gate.
#[derive(Debug, Clone, Default)]
pub struct RefreshGate(Arc<Mutex<()>>);

impl RefreshGate {
    /// Create a new, open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Layer installing [`AuthMiddleware`] around a transport.
///
/// # Example
///
/// ```ignore
/// use credgate::middleware::{AuthLayer, ServiceBuilder};
/// use credgate::{AuthConfig, ResilienceConfig};
///
/// let service = ServiceBuilder::new()
///     .layer(AuthLayer::new(AuthConfig::new("client-id", "client-secret"))
///         .with_resilience(ResilienceConfig::default()))
///     .service(transport);
/// ```
#[derive(Debug, Clone)]
pub struct AuthLayer {
    auth: Arc<AuthConfig>,
    resilience: ResilienceConfig,
    gate: RefreshGate,
}

impl AuthLayer {
    /// Create a layer with default resilience settings and its own gate.
    #[must_use]
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth: Arc::new(auth),
            resilience: ResilienceConfig::default(),
            gate: RefreshGate::new(),
        }
    }

    /// Set the resilience pipeline parameters.
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Use the given refresh gate.
    #[must_use]
    pub fn with_refresh_gate(mut self, gate: RefreshGate) -> Self {
        self.gate = gate;
        self
    }
}

impl<S> Layer<S> for AuthLayer
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Service = AuthMiddleware;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware::new(BoxCloneService::new(inner), self)
    }
}

struct AuthInner {
    pipelines: PipelineRegistry,
    acquirer: TokenAcquirer,
    cache: TokenCache,
    gate: RefreshGate,
}

/// Client-credentials middleware.
///
/// Cheap to clone; clones share the token cache, pipelines and gate.
#[derive(Clone)]
pub struct AuthMiddleware {
    inner: Arc<AuthInner>,
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("cached_tokens", &self.inner.cache.len())
            .field("pipeline", self.inner.pipelines.default_pipeline())
            .finish_non_exhaustive()
    }
}

impl AuthMiddleware {
    fn new(transport: BoxedService, layer: &AuthLayer) -> Self {
        let pipelines = PipelineRegistry::new(transport, layer.resilience);
        let acquirer = TokenAcquirer::new(
            Arc::clone(&layer.auth),
            pipelines.default_pipeline().clone(),
        );

        Self {
            inner: Arc::new(AuthInner {
                pipelines,
                acquirer,
                cache: TokenCache::new(),
                gate: layer.gate.clone(),
            }),
        }
    }

    /// Send a request, managing its token when it asks for a scope.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingTarget`] when the request has no URL, before any
    ///   policy runs.
    /// - Configuration and token-endpoint errors from token acquisition.
    /// - Transport, timeout and broken-circuit errors from the pipeline.
    ///
    /// Non-success statuses from the target are returned as responses.
    pub async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let span = info_span!(
            "credgate.send",
            method = %request.method(),
            url = request.url().map(url::Url::as_str),
            scope = request.options().scope(),
            identity = request.options().identity(),
        );
        self.send_inner(request).instrument(span).await
    }

    /// Same as [`AuthMiddleware::send`], giving up with [`Error::Cancelled`]
    /// once `token` is cancelled.
    ///
    /// Cancellation aborts pending I/O and backoff sleeps. A token whose
    /// acquisition was cancelled is never cached.
    ///
    /// # Errors
    ///
    /// See [`AuthMiddleware::send`].
    pub async fn send_with_cancellation(
        &self,
        request: Request<Bytes>,
        token: &CancellationToken,
    ) -> Result<Response<Bytes>> {
        with_cancellation(self.send(request), token).await
    }

    /// The live cached token for an identity and scope, if any.
    #[must_use]
    pub fn cached_token(&self, identity: Option<&str>, scope: &str) -> Option<String> {
        self.inner.cache.try_get(&CacheKey::new(identity, scope))
    }

    /// The pipeline used for requests without a timeout override.
    #[must_use]
    pub fn default_pipeline(&self) -> &ResiliencePipeline {
        self.inner.pipelines.default_pipeline()
    }

    async fn send_inner(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>> {
        if request.url().is_none() {
            return Err(Error::MissingTarget);
        }

        let pipeline = self.inner.pipelines.for_timeout(request.options().timeout());
        let Some(key) = Self::managed_key(&request) else {
            return pipeline.execute(request).await;
        };

        let token = self.inner.token(&key, None).await?;
        request.set_header(AUTHORIZATION, token.clone());
        let response = pipeline.execute(request.clone()).await?;
        if response.status() != 401 {
            return Ok(response);
        }

        info!("target rejected the token, refreshing");
        let token = self.inner.token(&key, Some(token.as_str())).await?;
        request.set_header(AUTHORIZATION, token);
        pipeline.execute(request).await
    }

    /// The cache key for a request whose token the middleware manages.
    fn managed_key(request: &Request<Bytes>) -> Option<CacheKey> {
        if request.has_header(AUTHORIZATION) {
            return None;
        }
        let options = request.options();
        options
            .scope()
            .map(|scope| CacheKey::new(options.identity(), scope))
    }
}

impl AuthInner {
    /// A token for `key`.
    ///
    /// `rejected` is the token the target just answered 401 to. In that case
    /// the cache is bypassed on the fast path, and after the gate a cached
    /// token is only reused if it differs from the rejected one, which means
    /// another request already refreshed it.
    async fn token(&self, key: &CacheKey, rejected: Option<&str>) -> Result<String> {
        if rejected.is_none()
            && let Some(token) = self.cache.try_get(key)
        {
            debug!("token cache hit");
            return Ok(token);
        }

        let _guard = self.gate.0.lock().await;

        if let Some(token) = self.cache.try_get(key)
            && rejected != Some(token.as_str())
        {
            debug!("token refreshed by a concurrent request");
            return Ok(token);
        }

        let token = self.acquirer.acquire(key.identity(), key.scope()).await?;
        self.cache
            .add(key.clone(), token.value(), token.expires_in());
        Ok(token.into_value())
    }
}

impl Service<Request<Bytes>> for AuthMiddleware {
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.send(request).await })
    }
}

impl credgate_core::HttpClient for AuthMiddleware {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.send(request).await
    }
}
