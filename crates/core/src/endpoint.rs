//! Per-channel proxy endpoints (webhooks) that let the relay post under a
//! user's name and avatar.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::permissions::can_manage_webhooks;
use crate::types::{Channel, Webhook};
use crate::upstream::Upstream;

pub const RELAY_WEBHOOK_NAME: &str = "Relay Hook";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub channel_id: String,
    pub endpoint_id: String,
    pub endpoint_secret: String,
    pub created_at: DateTime<Utc>,
}

impl EndpointRecord {
    fn webhook(&self) -> Webhook {
        Webhook {
            id: self.endpoint_id.clone(),
            channel_id: self.channel_id.clone(),
            name: Some(RELAY_WEBHOOK_NAME.to_string()),
            owner_id: None,
            token: Some(self.endpoint_secret.clone()),
        }
    }
}

/// Durable channel → endpoint mapping. One record per channel; `put`
/// replaces.
#[async_trait]
pub trait EndpointStore: Send + Sync + 'static {
    async fn get(&self, channel_id: &str) -> RelayResult<Option<EndpointRecord>>;

    async fn put(&self, record: &EndpointRecord) -> RelayResult<()>;
}

pub struct EndpointManager {
    store: Arc<dyn EndpointStore>,
}

impl EndpointManager {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self { store }
    }

    /// Returns a usable endpoint for `channel`, creating one if the persisted
    /// record is missing or no longer exists upstream. A newly obtained
    /// endpoint is persisted before it is returned.
    pub async fn get_or_create(
        &self,
        upstream: &dyn Upstream,
        channel: &Channel,
    ) -> RelayResult<Webhook> {
        if let Some(record) = self.store.get(&channel.id).await? {
            match upstream.fetch_webhook(&record.endpoint_id).await {
                Ok(Some(_)) => return Ok(record.webhook()),
                Ok(None) | Err(RelayError::NotFound(_)) => {
                    info!(
                        channel_id = %channel.id,
                        endpoint_id = %record.endpoint_id,
                        "stored endpoint is gone, recreating"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let guild = upstream
            .guild(&channel.guild_id)
            .await
            .ok_or_else(|| RelayError::NotFound("Guild".to_string()))?;
        let bot_member = upstream.self_member(&channel.guild_id).await;
        if !can_manage_webhooks(&guild, channel, bot_member.as_ref()) {
            warn!(channel_id = %channel.id, "bot cannot manage webhooks");
            return Err(RelayError::InsufficientPermission("MANAGE_WEBHOOKS"));
        }

        let bot_id = &upstream.identity().id;
        let existing = upstream
            .channel_webhooks(&channel.id)
            .await?
            .into_iter()
            .find(|w| {
                w.name.as_deref() == Some(RELAY_WEBHOOK_NAME)
                    && w.owner_id.as_deref() == Some(bot_id.as_str())
                    && w.token.is_some()
            });

        let webhook = match existing {
            Some(webhook) => {
                debug!(channel_id = %channel.id, endpoint_id = %webhook.id, "adopting existing endpoint");
                webhook
            }
            None => upstream.create_webhook(&channel.id, RELAY_WEBHOOK_NAME).await?,
        };

        let Some(secret) = webhook.token.clone() else {
            return Err(RelayError::UpstreamUnavailable(
                "created webhook has no token".to_string(),
            ));
        };

        self.store
            .put(&EndpointRecord {
                channel_id: channel.id.clone(),
                endpoint_id: webhook.id.clone(),
                endpoint_secret: secret,
                created_at: Utc::now(),
            })
            .await?;

        info!(channel_id = %channel.id, endpoint_id = %webhook.id, "endpoint ready");
        Ok(webhook)
    }
}
