//! Tower middleware layers for the credgate HTTP client.
//!
//! # Available Layers
//!
//! - [`AuthLayer`] - Managed client-credentials tokens on top of the
//!   resilience pipeline
//! - [`IdentityLayer`] - Default credential identity for a client
//! - [`LoggingLayer`] - Logs requests/responses using `tracing`
//! - [`CircuitBreakerLayer`] - Circuit breaker pattern
//! - [`RetryPolicy`] - Jittered retry policy for [`RetryLayer`]
//! - [`TimeoutLayer`] - Per-attempt timeout
//!
//! [`ResiliencePipeline`] composes the last three in the order circuit
//! breaker, retry, timeout.
//!
//! # Example
//!
//! ```ignore
//! use credgate::middleware::{IdentityLayer, LoggingLayer};
//! use credgate::{AuthConfig, HyperClient};
//!
//! let client = HyperClient::builder()
//!     .with_client_credentials(AuthConfig::new("client-id", "client-secret"))
//!     .layer(IdentityLayer::new("user1"))
//!     .layer(LoggingLayer::new())
//!     .build();
//! ```

mod auth;
mod circuit_breaker;
mod identity;
mod logging;
mod pipeline;
mod retry;
mod timeout;

pub use auth::{AuthLayer, AuthMiddleware, RefreshGate};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitState,
};
pub use identity::{Identity, IdentityLayer};
pub use logging::{LogLevel, Logging, LoggingLayer};
pub use pipeline::{PipelineRegistry, ResiliencePipeline};
pub use retry::{RETRYABLE_STATUSES, RetryPolicy};
pub use timeout::{Timeout, TimeoutLayer};

// Re-export tower types for convenience
pub use tower::retry::RetryLayer;
pub use tower::{Layer, ServiceBuilder};
