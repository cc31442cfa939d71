//! Default credential identity for a client.

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tower::{Layer, Service};

use crate::Request;

/// Layer that tags requests with a credential identity.
///
/// Requests that already name an identity keep it.
///
/// # Example
///
/// ```ignore
/// use credgate::middleware::IdentityLayer;
///
/// let client = HyperClient::builder()
///     .with_client_credentials(config)
///     .layer(IdentityLayer::new("user1"))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct IdentityLayer {
    identity: Arc<str>,
}

impl IdentityLayer {
    /// Create a layer for the named identity.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Arc::from(identity.into()),
        }
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = Identity<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Identity {
            inner,
            identity: Arc::clone(&self.identity),
        }
    }
}

/// Service that fills in the request identity.
#[derive(Debug, Clone)]
pub struct Identity<S> {
    inner: S,
    identity: Arc<str>,
}

impl<S> Service<Request<Bytes>> for Identity<S>
where
    S: Service<Request<Bytes>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Bytes>) -> Self::Future {
        if request.options().identity().is_none() {
            request.options_mut().set_identity(self.identity.as_ref());
        }
        self.inner.call(request)
    }
}
