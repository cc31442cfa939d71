//! HTTP client middleware with managed OAuth2 client-credentials tokens.
//!
//! Requests that carry a scope get a bearer token attached automatically.
//! Tokens are cached per identity and scope, refreshed under a gate so that
//! concurrent requests trigger a single exchange, and refreshed once more
//! when the target answers 401. Every outbound call, token exchanges
//! included, runs through a resilience pipeline: circuit breaker, jittered
//! retry and per-attempt timeout.
//!
//! # Example
//!
//! ```ignore
//! use credgate::prelude::*;
//!
//! let client = HyperClient::builder()
//!     .with_client_credentials(AuthConfig::new("client-id", "client-secret"))
//!     .build();
//!
//! let response = client
//!     .get_scoped("https://developer.api.autodesk.com/oss/v2/buckets", "data:read")
//!     .await?
//!     .error_for_status()?;
//! ```

mod acquirer;
mod client;
mod config;
mod connector;
mod credentials;
pub mod middleware;
pub mod prelude;
mod token_cache;

// Re-export client types
pub use acquirer::{AccessToken, TokenAcquirer};
pub use client::{BoxedService, HyperClient, HyperClientBuilder, ServiceFuture};
pub use config::{
    AuthConfig, ClientConfig, ClientConfigBuilder, DEFAULT_AUTHENTICATION_ADDRESS,
    IdentityCredentials, ResilienceConfig,
};
pub use credentials::{ClientCredentials, CredentialResolver};
pub use token_cache::{CacheKey, TokenCache};

// Re-export tower for middleware composition
pub use tower;

// Re-export core types
pub use credgate_core::{
    AUTHORIZATION, ContentType, Error, ErrorKind, HttpClient, HttpClientExt, Method, Request,
    RequestBuilder, RequestOptions, Response, Result, StatusCode, from_json, header, to_form,
    to_json,
};

pub use tokio_util::sync::CancellationToken;
pub use url;
