//! HTTP request building.
//!
//! A [`Request`] carries, next to the usual method/URL/headers/body, a
//! [`RequestOptions`] bag read by the middleware: the OAuth scope that turns on
//! managed authentication, the credential identity, and a per-request timeout.
//!
//! # Example
//!
//! ```
//! use credgate_core::{Method, Request};
//! use bytes::Bytes;
//!
//! let request = Request::<Bytes>::builder(Method::GET, "https://api.example.com/items".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .scope("data:read")
//!     .timeout_seconds(30)
//!     .build();
//!
//! assert_eq!(request.options().scope(), Some("data:read"));
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::ContentType;

/// Header name used for credentials.
pub const AUTHORIZATION: &str = "Authorization";

// ============================================================================
// Request Options
// ============================================================================

/// Per-request options consumed by the middleware.
///
/// The key set is closed: `scope`, `identity` and `timeout`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    scope: Option<String>,
    identity: Option<String>,
    timeout: Option<Duration>,
}

impl RequestOptions {
    /// The requested OAuth scope, if any. Empty scopes are reported as `None`.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref().filter(|scope| !scope.is_empty())
    }

    /// The credential identity, `None` for the default credentials.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|identity| !identity.is_empty())
    }

    /// The per-request timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the scope.
    pub fn set_scope(&mut self, scope: impl Into<String>) {
        self.scope = Some(scope.into());
    }

    /// Set the identity.
    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = Some(identity.into());
    }

    /// Set the timeout from a number of seconds. Zero clears the override.
    pub fn set_timeout_seconds(&mut self, seconds: u64) {
        self.timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
    }
}

// ============================================================================
// Request
// ============================================================================

/// An HTTP request with method, target URL, headers, optional body and options.
#[derive(Debug, Clone)]
pub struct Request<B = Bytes> {
    method: Method,
    url: Option<url::Url>,
    headers: HashMap<String, String>,
    body: Option<B>,
    options: RequestOptions,
}

impl<B> Request<B> {
    /// Creates a new [`RequestBuilder`] for the given target.
    #[must_use]
    pub fn builder(method: Method, url: url::Url) -> RequestBuilder<B> {
        RequestBuilder::new(method, Some(url))
    }

    /// Creates a [`RequestBuilder`] without a target URL.
    ///
    /// Sending such a request fails with [`crate::Error::MissingTarget`].
    #[must_use]
    pub fn unaddressed(method: Method) -> RequestBuilder<B> {
        RequestBuilder::new(method, None)
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL, if any.
    #[must_use]
    pub fn url(&self) -> Option<&url::Url> {
        self.url.as_ref()
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Mutable access to headers.
    #[must_use]
    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }

    /// Single header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header is present, ignoring ASCII case.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replace a header, removing any differently-cased duplicate first.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    /// Middleware options.
    #[must_use]
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Mutable access to middleware options.
    #[must_use]
    pub fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.options
    }

    /// Consume into (method, url, headers, body).
    #[must_use]
    pub fn into_parts(self) -> (Method, Option<url::Url>, HashMap<String, String>, Option<B>) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// Builder for constructing [`Request`] instances.
#[derive(Debug, Clone)]
pub struct RequestBuilder<B = Bytes> {
    method: Method,
    url: Option<url::Url>,
    headers: HashMap<String, String>,
    body: Option<B>,
    options: RequestOptions,
}

impl<B> RequestBuilder<B> {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: Option<url::Url>) -> Self {
        Self {
            method,
            url,
            headers: HashMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets multiple headers.
    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Appends a query parameter to the URL. Ignored without a target.
    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        if let Some(url) = self.url.as_mut() {
            url.query_pairs_mut().append_pair(name, value);
        }
        self
    }

    /// Appends several query parameters.
    #[must_use]
    pub fn query_pairs<'a>(mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        if let Some(url) = self.url.as_mut() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    /// Requests managed authentication with the given scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.options.set_scope(scope);
        self
    }

    /// Selects a named credential identity.
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.options.set_identity(identity);
        self
    }

    /// Overrides the pipeline timeout for this request.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.options.set_timeout_seconds(seconds);
        self
    }

    /// Builds the [`Request`].
    #[must_use]
    pub fn build(self) -> Request<B> {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            options: self.options,
        }
    }
}

impl RequestBuilder<Bytes> {
    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json<T: serde::Serialize>(self, value: &T) -> crate::Result<Self> {
        let body = crate::to_json(value)?;
        Ok(self
            .header("Content-Type", ContentType::Json.as_str())
            .body(body))
    }

    /// Set a form-urlencoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn form<T: serde::Serialize>(self, value: &T) -> crate::Result<Self> {
        let body = crate::to_form(value)?;
        Ok(self
            .header("Content-Type", ContentType::FormUrlEncoded.as_str())
            .body(body))
    }
}
