//! The capability set the relay needs from an upstream chat platform.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RelayResult;
use crate::types::{
    Channel, Guild, Member, UpstreamEvent, UpstreamMessage, UpstreamUser, Webhook, WebhookPayload,
};

/// One authenticated bot session. Cache lookups reflect the session's live
/// view of its guilds; the remaining calls are upstream round trips.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// The bot account this session is logged in as.
    fn identity(&self) -> &UpstreamUser;

    async fn guild(&self, guild_id: &str) -> Option<Guild>;

    async fn guilds(&self) -> Vec<Guild>;

    async fn channel(&self, channel_id: &str) -> Option<Channel>;

    async fn guild_channels(&self, guild_id: &str) -> Vec<Channel>;

    /// The bot's own member record in a guild.
    async fn self_member(&self, guild_id: &str) -> Option<Member>;

    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> RelayResult<Member>;

    async fn list_members(&self, guild_id: &str, limit: u16) -> RelayResult<Vec<Member>>;

    /// Newest first, as the platform returns them.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> RelayResult<Vec<UpstreamMessage>>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str)
        -> RelayResult<UpstreamMessage>;

    /// `Ok(None)` when the webhook no longer exists.
    async fn fetch_webhook(&self, webhook_id: &str) -> RelayResult<Option<Webhook>>;

    async fn channel_webhooks(&self, channel_id: &str) -> RelayResult<Vec<Webhook>>;

    async fn create_webhook(&self, channel_id: &str, name: &str) -> RelayResult<Webhook>;

    async fn execute_webhook(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
    ) -> RelayResult<UpstreamMessage>;

    fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent>;

    async fn shutdown(&self);
}

/// Logs in with a bot credential.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolves the account behind a credential without opening a session.
    async fn identify(&self, credential: &str) -> RelayResult<UpstreamUser>;

    /// Opens a session; returns once its guilds are discoverable.
    async fn connect(&self, credential: &str) -> RelayResult<Arc<dyn Upstream>>;
}
