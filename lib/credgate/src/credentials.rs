//! Resolution of client credentials for an identity.

use std::sync::Arc;

use crate::Error;
use crate::config::AuthConfig;

/// A client id / secret pair ready to be sent to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    /// Client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Maps an optional identity name to a credential pair.
///
/// No identity selects the default credentials. A named identity must be
/// present in [`AuthConfig::identities`]; there is no fallback to the
/// defaults for an unknown name.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    config: Arc<AuthConfig>,
}

impl CredentialResolver {
    /// Create a resolver over the given configuration.
    #[must_use]
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }

    /// Resolve the credentials for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] when the identity is unknown or
    /// its client id or secret is absent or empty.
    pub fn resolve(&self, identity: Option<&str>) -> crate::Result<ClientCredentials> {
        let identity = identity.filter(|name| !name.is_empty());
        let (client_id, client_secret) = match identity {
            None => (
                self.config.client_id.as_deref(),
                self.config.client_secret.as_deref(),
            ),
            Some(name) => {
                let entry = self
                    .config
                    .identities
                    .get(name)
                    .ok_or_else(|| Error::missing_credentials(identity, "client_id"))?;
                (entry.client_id.as_deref(), entry.client_secret.as_deref())
            }
        };

        let client_id = non_empty(client_id)
            .ok_or_else(|| Error::missing_credentials(identity, "client_id"))?;
        let client_secret = non_empty(client_secret)
            .ok_or_else(|| Error::missing_credentials(identity, "client_secret"))?;

        Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CredentialResolver {
        let config = AuthConfig::new("bla", "blabla").with_identity("user1", "user1-bla", "user1-blabla");
        CredentialResolver::new(Arc::new(config))
    }

    #[test]
    fn resolves_default_credentials() {
        let credentials = resolver().resolve(None).expect("default credentials");
        assert_eq!(credentials.client_id(), "bla");
        assert_eq!(credentials.client_secret(), "blabla");
    }

    #[test]
    fn resolves_named_identity() {
        let credentials = resolver().resolve(Some("user1")).expect("user1 credentials");
        assert_eq!(credentials.client_id(), "user1-bla");
        assert_eq!(credentials.client_secret(), "user1-blabla");
    }

    #[test]
    fn empty_identity_uses_defaults() {
        let credentials = resolver().resolve(Some("")).expect("default credentials");
        assert_eq!(credentials.client_id(), "bla");
    }

    #[test]
    fn unknown_identity_is_a_configuration_error() {
        let err = resolver().resolve(Some("nobody")).expect_err("unknown identity");
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "missing client_id for identity 'nobody'");
    }

    #[test]
    fn missing_secret_is_reported() {
        let mut config = AuthConfig::default();
        config.client_id = Some("bla".to_string());
        let resolver = CredentialResolver::new(Arc::new(config));

        let err = resolver.resolve(None).expect_err("no secret");
        assert!(matches!(
            err,
            Error::MissingCredentials { field: "client_secret", .. }
        ));
    }

    #[test]
    fn empty_client_id_is_missing() {
        let config = AuthConfig::new("", "secret");
        let err = CredentialResolver::new(Arc::new(config))
            .resolve(None)
            .expect_err("empty id");
        assert!(matches!(err, Error::MissingCredentials { field: "client_id", .. }));
    }

    #[test]
    fn debug_hides_secret() {
        let credentials = resolver().resolve(None).expect("default credentials");
        assert!(!format!("{credentials:?}").contains("blabla"));
    }
}
