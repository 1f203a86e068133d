//! Live map of relay tokens to their storage destination.

use std::time::{Duration, Instant};

use moka::future::Cache;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDestination {
    pub key: String,
    pub content_type: String,
    pub expires_at: Instant,
}

impl RelayDestination {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Tokens are single-use: `consume` removes the entry atomically, so two
/// concurrent deliveries with the same token cannot both obtain it.
#[derive(Clone)]
pub struct RelayTokens {
    cache: Cache<String, RelayDestination>,
    ttl: Duration,
}

impl RelayTokens {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(10_000)
            .build();
        Self { cache, ttl }
    }

    /// Register a fresh token for `key` and return it.
    pub async fn issue(&self, key: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let destination = RelayDestination {
            key: key.to_string(),
            content_type: content_type_for(key),
            expires_at: Instant::now() + self.ttl,
        };
        self.cache.insert(token.clone(), destination).await;
        log::debug!("Issued relay token for '{}'", key);
        token
    }

    /// Claim a token. `None` for unknown, already consumed or expired tokens.
    pub async fn consume(&self, token: &str) -> Option<RelayDestination> {
        let destination = self.cache.remove(token).await?;
        if destination.is_expired() {
            log::warn!("Relay token for '{}' presented after expiry", destination.key);
            return None;
        }
        Some(destination)
    }

    /// Put back a claimed token whose write failed, unless it has expired meanwhile.
    pub async fn restore(&self, token: String, destination: RelayDestination) {
        if !destination.is_expired() {
            self.cache.insert(token, destination).await;
        }
    }

    pub async fn revoke(&self, token: &str) {
        self.cache.invalidate(token).await;
    }

    pub async fn is_live(&self, token: &str) -> bool {
        self.cache
            .get(token)
            .await
            .is_some_and(|destination| !destination.is_expired())
    }
}

pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
