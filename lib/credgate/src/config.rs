//! Client configuration types.
//!
//! Three independent pieces:
//! - [`ClientConfig`] tunes the hyper transport (connection pool, connect timeout).
//! - [`AuthConfig`] holds the client-credentials settings. It implements
//!   `Deserialize` so an application can load it from whatever source it uses.
//! - [`ResilienceConfig`] parameterizes the timeout / retry / breaker pipeline.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Token endpoint used when none is configured.
pub const DEFAULT_AUTHENTICATION_ADDRESS: &str =
    "https://developer.api.autodesk.com/authentication/v2/token";

// ============================================================================
// Transport
// ============================================================================

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    connect_timeout: Option<Duration>,
    pool_idle_per_host: Option<usize>,
    pool_idle_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub const fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.pool_idle_per_host = Some(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            pool_idle_per_host: self
                .pool_idle_per_host
                .unwrap_or(defaults.pool_idle_per_host),
            pool_idle_timeout: self.pool_idle_timeout.unwrap_or(defaults.pool_idle_timeout),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Client-credentials settings: default credentials, named overrides and the
/// token endpoint.
///
/// Values are only validated when a token is actually requested.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Default client id.
    pub client_id: Option<String>,
    /// Default client secret.
    pub client_secret: Option<String>,
    /// Token endpoint.
    pub authentication_address: url::Url,
    /// Named credential overrides, selected by the request identity.
    pub identities: HashMap<String, IdentityCredentials>,
}

/// Credentials for one named identity.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityCredentials {
    /// Client id for this identity.
    pub client_id: Option<String>,
    /// Client secret for this identity.
    pub client_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authentication_address: default_authentication_address(),
            identities: HashMap::new(),
        }
    }
}

#[allow(
    clippy::expect_used,
    reason = "DEFAULT_AUTHENTICATION_ADDRESS is an absolute URL literal, covered by a unit test"
)]
fn default_authentication_address() -> url::Url {
    url::Url::parse(DEFAULT_AUTHENTICATION_ADDRESS).expect("constant URL is valid")
}

impl AuthConfig {
    /// Create a configuration with default credentials.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            ..Self::default()
        }
    }

    /// Set the token endpoint.
    #[must_use]
    pub fn with_authentication_address(mut self, address: url::Url) -> Self {
        self.authentication_address = address;
        self
    }

    /// Add credentials for a named identity.
    #[must_use]
    pub fn with_identity(
        mut self,
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.identities.insert(
            name.into(),
            IdentityCredentials {
                client_id: Some(client_id.into()),
                client_secret: Some(client_secret.into()),
            },
        );
        self
    }
}

fn redact(secret: Option<&String>) -> &'static str {
    if secret.is_some() { "<redacted>" } else { "<unset>" }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret.as_ref()))
            .field("authentication_address", &self.authentication_address.as_str())
            .field("identities", &self.identities)
            .finish()
    }
}

impl std::fmt::Debug for IdentityCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret.as_ref()))
            .finish()
    }
}

// ============================================================================
// Resilience
// ============================================================================

/// Parameters of the timeout / retry / circuit-breaker pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Per-attempt timeout when the request does not override it.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Lower bound of the random jitter, in milliseconds.
    pub base_delay_ms: u64,
    /// Jitter upper bound is `2^attempt * multiplier_ms`.
    pub multiplier_ms: u64,
    /// Consecutive qualifying failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    pub break_duration: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 5,
            base_delay_ms: 500,
            multiplier_ms: 1000,
            failure_threshold: 3,
            break_duration: Duration::from_secs(60),
        }
    }
}

impl ResilienceConfig {
    /// Set the default per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the jitter bounds.
    #[must_use]
    pub const fn with_jitter(mut self, base_delay_ms: u64, multiplier_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.multiplier_ms = multiplier_ms;
        self
    }

    /// Set the breaker failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the breaker stays open.
    #[must_use]
    pub const fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }
}
