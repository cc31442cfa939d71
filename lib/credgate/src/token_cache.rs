//! In-memory cache of bearer tokens keyed by identity and scope.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

// Clamp for absurd `expires_in` values so the deadline cannot overflow.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Cache key: the credential identity plus the requested scope.
///
/// Kept as two fields so that no identity/scope pair can collide with another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    identity: Option<String>,
    scope: String,
}

impl CacheKey {
    /// Create a key. `None` selects the default credentials.
    #[must_use]
    pub fn new(identity: Option<&str>, scope: impl Into<String>) -> Self {
        Self {
            identity: identity.filter(|name| !name.is_empty()).map(str::to_string),
            scope: scope.into(),
        }
    }

    /// Credential identity.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// OAuth scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    token: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe token cache with per-entry expiry.
///
/// An entry stored with a zero TTL is already expired when it is read back.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl TokenCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` under `key` for `ttl`, replacing any previous entry.
    pub fn add(&self, key: CacheKey, token: impl Into<String>, ttl: Duration) {
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.entries.insert(
            key,
            CacheEntry {
                token: token.into(),
                expires_at,
            },
        );
    }

    /// Return the live token for `key`, if any.
    #[must_use]
    pub fn try_get(&self, key: &CacheKey) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token.clone())
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
