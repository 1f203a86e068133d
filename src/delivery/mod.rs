//! Output delivery strategies.
//!
//! Every submission gets exactly one write destination for its output. Either the
//! rendering service writes straight into the object store through a presigned
//! upload URL, or it `PUT`s the bytes to our relay endpoint, which stores them.
//! Some RunScript deployments silently ignore presigned upload URLs, hence the relay.

pub mod handlers;
pub mod tokens;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::{ObjectStorage, StorageError};

pub use tokens::{RelayDestination, RelayTokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Direct,
    Relay,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" | "presigned" => Ok(Self::Direct),
            "relay" | "callback" => Ok(Self::Relay),
            other => Err(format!("unknown delivery mode '{other}' (expected direct or relay)")),
        }
    }
}

/// Where and how the rendering service should send its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub href: String,
    pub method: String,
    /// Set for relay deliveries so an abandoned submission can revoke it.
    pub relay_token: Option<String>,
}

#[async_trait::async_trait]
pub trait OutputDelivery {
    fn mode(&self) -> DeliveryMode;

    /// Mint the single write destination for `output_key`.
    async fn prepare(&self, output_key: &str) -> Result<DeliveryTarget, StorageError>;

    /// Give up a destination whose submission never reached the service.
    async fn release(&self, target: &DeliveryTarget);
}

pub struct DirectWriteDelivery {
    storage: Arc<dyn ObjectStorage + Send + Sync>,
    ttl: Duration,
}

impl DirectWriteDelivery {
    pub fn new(storage: Arc<dyn ObjectStorage + Send + Sync>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }
}

#[async_trait::async_trait]
impl OutputDelivery for DirectWriteDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Direct
    }

    async fn prepare(&self, output_key: &str) -> Result<DeliveryTarget, StorageError> {
        let href = self
            .storage
            .create_signed_upload_url(output_key, self.ttl)
            .await?;
        Ok(DeliveryTarget {
            href,
            method: "PUT".to_string(),
            relay_token: None,
        })
    }

    // Unused signed upload URLs lapse on their own.
    async fn release(&self, _target: &DeliveryTarget) {}
}

pub struct RelayDelivery {
    tokens: RelayTokens,
    public_base_url: String,
}

impl RelayDelivery {
    pub fn new(tokens: RelayTokens, public_base_url: &str) -> Self {
        Self {
            tokens,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl OutputDelivery for RelayDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Relay
    }

    async fn prepare(&self, output_key: &str) -> Result<DeliveryTarget, StorageError> {
        let token = self.tokens.issue(output_key).await;
        Ok(DeliveryTarget {
            href: format!("{}/receive-output/{}", self.public_base_url, token),
            method: "PUT".to_string(),
            relay_token: Some(token),
        })
    }

    async fn release(&self, target: &DeliveryTarget) {
        if let Some(token) = &target.relay_token {
            self.tokens.revoke(token).await;
        }
    }
}
