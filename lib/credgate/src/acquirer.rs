//! Client-credentials token exchange.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::AuthConfig;
use crate::credentials::CredentialResolver;
use crate::middleware::ResiliencePipeline;
use crate::{Error, Method, Request, Result};

/// A freshly acquired token and how long it may be cached.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_in: Duration,
}

impl AccessToken {
    /// Create a token from its `Authorization` header value and lifetime.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            expires_in,
        }
    }

    /// Header value, `"<token_type> <access_token>"`.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Lifetime reported by the token endpoint.
    #[must_use]
    pub const fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Consume into the header value.
    #[must_use]
    pub fn into_value(self) -> String {
        self.value
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = self.value.split_once(' ').map_or("", |(scheme, _)| scheme);
        f.debug_struct("AccessToken")
            .field("scheme", &scheme)
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// `expires_in` arrives as a JSON number from most servers and as a string
/// from some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(f64),
    Text(String),
}

impl ExpiresIn {
    fn to_duration(&self) -> Result<Duration> {
        let seconds = match self {
            Self::Seconds(seconds) => *seconds,
            Self::Text(text) => text.trim().parse::<f64>().map_err(|err| {
                Error::json_deserialization("expires_in", format!("'{text}' is not a number: {err}"))
            })?,
        };
        if !seconds.is_finite() {
            return Err(Error::json_deserialization(
                "expires_in",
                format!("invalid lifetime {seconds}"),
            ));
        }
        // A non-positive lifetime yields a token usable once, cached already expired.
        Ok(Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
    expires_in: ExpiresIn,
}

/// Exchanges client credentials for a bearer token.
///
/// The exchange goes through the same resilience pipeline as regular
/// traffic, so the token endpoint gets the same timeout, retry and breaker
/// treatment.
#[derive(Debug, Clone)]
pub struct TokenAcquirer {
    endpoint: url::Url,
    resolver: CredentialResolver,
    pipeline: ResiliencePipeline,
}

impl TokenAcquirer {
    /// Create an acquirer sending through `pipeline`.
    #[must_use]
    pub fn new(config: Arc<AuthConfig>, pipeline: ResiliencePipeline) -> Self {
        Self {
            endpoint: config.authentication_address.clone(),
            resolver: CredentialResolver::new(config),
            pipeline,
        }
    }

    /// Acquire a token for `scope` with the credentials of `identity`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] before any network call when the
    ///   identity cannot be resolved.
    /// - [`Error::Http`] when the token endpoint answers with a non-success
    ///   status (after retries).
    /// - [`Error::JsonDeserialization`] when the answer cannot be parsed.
    /// - Any transport, timeout or broken-circuit error from the pipeline.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn acquire(&self, identity: Option<&str>, scope: &str) -> Result<AccessToken> {
        let credentials = self.resolver.resolve(identity)?;

        let form = vec![
            ("client_id", credentials.client_id()),
            ("client_secret", credentials.client_secret()),
            ("grant_type", "client_credentials"),
            ("scope", scope),
        ];
        let request = Request::<Bytes>::builder(Method::POST, self.endpoint.clone())
            .header("Accept", "application/json")
            .form(&form)?
            .build();

        let response = self.pipeline.execute(request).await?.error_for_status()?;
        let token: TokenResponse = response.json()?;
        let expires_in = token.expires_in.to_duration()?;

        debug!(expires_in_secs = expires_in.as_secs(), "token acquired");
        Ok(AccessToken::new(
            format!("{} {}", token.token_type, token.access_token),
            expires_in,
        ))
    }
}
