//! HTTP client traits.
//!
//! [`HttpClient`] is the seam between callers and whatever sends bytes on
//! the wire. The middleware in `credgate` both consumes and implements it.

use std::future::Future;

use bytes::Bytes;
use http::Method;

use crate::{Request, Response, Result};

/// Core HTTP client trait.
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request and return the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any reason:
    /// - Network errors
    /// - TLS errors
    /// - Timeouts
    /// - Configuration errors raised by middleware
    fn execute(
        &self,
        request: Request<Bytes>,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

/// Extension trait for [`HttpClient`] with convenience methods.
pub trait HttpClientExt: HttpClient {
    /// Execute a GET request without managed authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the request fails.
    fn get(&self, url: &str) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = url::Url::parse(url)?;
            let request = Request::builder(Method::GET, url).build();
            self.execute(request).await
        }
    }

    /// Execute a GET request authenticated with a token for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the request fails.
    fn get_scoped(
        &self,
        url: &str,
        scope: &str,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = url::Url::parse(url)?;
            let request = Request::builder(Method::GET, url).scope(scope).build();
            self.execute(request).await
        }
    }

    /// Execute a POST request with a JSON body, authenticated for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the request fails.
    fn post_json_scoped<T: serde::Serialize + Send + Sync>(
        &self,
        url: &str,
        scope: &str,
        body: &T,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = url::Url::parse(url)?;
            let request = Request::builder(Method::POST, url)
                .scope(scope)
                .json(body)?
                .build();
            self.execute(request).await
        }
    }
}

// Blanket implementation for all HttpClient implementors
impl<T: HttpClient> HttpClientExt for T {}
