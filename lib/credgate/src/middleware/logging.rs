//! Request/response logging middleware.
//!
//! Logs through `tracing`. Credentials never reach the log: the
//! `Authorization` header is reported by scheme only.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{Instrument, Level, debug, info, span, warn};

use crate::{AUTHORIZATION, Error, Request, Response, Result};

/// Layer that adds request/response logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer {
    level: LogLevel,
}

/// Log level for the logging middleware.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogLevel {
    /// Debug level, with redacted headers.
    Debug,
    /// Info level, summary only.
    #[default]
    Info,
}

impl LoggingLayer {
    /// Create a new logging layer with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging layer that logs at debug level.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging {
            inner,
            level: self.level,
        }
    }
}

/// Service that logs requests and responses.
#[derive(Debug, Clone)]
pub struct Logging<S> {
    inner: S,
    level: LogLevel,
}

/// Header map safe to log.
fn redacted_headers(request: &Request<Bytes>) -> BTreeMap<&str, String> {
    request
        .headers()
        .iter()
        .map(|(name, value)| {
            let shown = if name.eq_ignore_ascii_case(AUTHORIZATION) {
                let scheme = value.split_once(' ').map_or("", |(scheme, _)| scheme);
                format!("{scheme} <redacted>")
            } else {
                value.clone()
            };
            (name.as_str(), shown)
        })
        .collect()
}

impl<S> Service<Request<Bytes>> for Logging<S>
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
        let method = request.method().clone();
        let url = request.url().map(ToString::to_string).unwrap_or_default();
        let scope = request.options().scope().unwrap_or_default().to_string();
        let identity = request.options().identity().unwrap_or("default").to_string();
        let span = span!(Level::INFO, "http_request", %method, %url, %scope, %identity);

        match self.level {
            LogLevel::Debug => {
                let headers = redacted_headers(&request);
                span.in_scope(|| debug!(?headers, "sending request"));
            }
            LogLevel::Info => span.in_scope(|| info!("sending request")),
        }

        let fut = self.inner.call(request);
        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                match &result {
                    Ok(response) if response.is_success() => {
                        info!(status = response.status(), elapsed_ms, "request completed");
                    }
                    Ok(response) => {
                        warn!(status = response.status(), elapsed_ms, "request failed with HTTP error");
                    }
                    Err(err) => {
                        warn!(error = %err, kind = %err.kind(), elapsed_ms, "request failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
