//! Discord bot sessions behind the relay's `Upstream` / `Connector` traits.

pub mod cache;
pub mod gateway;
pub mod model;
pub mod rest;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::types::{
    Channel, Guild, Member, UpstreamEvent, UpstreamMessage, UpstreamUser, Webhook, WebhookPayload,
};
use relay_core::upstream::{Connector, Upstream};
use relay_core::{RelayError, RelayResult};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::GuildCache;
use crate::gateway::{GatewayContext, GATEWAY_URL};
use crate::rest::{RestClient, API_BASE};

/// How long `connect` waits for the initial guild list.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct DiscordConnector {
    gateway_url: String,
    api_base: String,
    ready_timeout: Duration,
}

impl Default for DiscordConnector {
    fn default() -> Self {
        Self {
            gateway_url: GATEWAY_URL.to_string(),
            api_base: API_BASE.to_string(),
            ready_timeout: READY_TIMEOUT,
        }
    }
}

impl DiscordConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    async fn identify(&self, credential: &str) -> RelayResult<UpstreamUser> {
        RestClient::with_base(credential, &self.api_base)?
            .current_user()
            .await
    }

    async fn connect(&self, credential: &str) -> RelayResult<Arc<dyn Upstream>> {
        let rest = RestClient::with_base(credential, &self.api_base)?;
        let user = rest.current_user().await?;

        let cache = Arc::new(GuildCache::new(&user.id));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let task = tokio::spawn(gateway::run(GatewayContext {
            url: self.gateway_url.clone(),
            token: credential.to_string(),
            cache: cache.clone(),
            events: events.clone(),
            ready: ready_tx,
        }));

        let outcome = tokio::time::timeout(self.ready_timeout, ready_rx.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => info!(bot = %user.id, username = %user.username, "bot session ready"),
            Ok(Err(_)) => {
                task.abort();
                return Err(RelayError::UpstreamUnavailable(
                    "gateway session ended before ready".to_string(),
                ));
            }
            Err(_) => warn!(bot = %user.id, "guild discovery timed out, continuing with a partial cache"),
        }

        Ok(Arc::new(DiscordConnection {
            user,
            rest,
            cache,
            events,
            task: Mutex::new(Some(task)),
        }))
    }
}

pub struct DiscordConnection {
    user: UpstreamUser,
    rest: RestClient,
    cache: Arc<GuildCache>,
    events: broadcast::Sender<UpstreamEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscordConnection {
    fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl Upstream for DiscordConnection {
    fn identity(&self) -> &UpstreamUser {
        &self.user
    }

    async fn guild(&self, guild_id: &str) -> Option<Guild> {
        self.cache.guild(guild_id).await
    }

    async fn guilds(&self) -> Vec<Guild> {
        self.cache.guilds().await
    }

    async fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.cache.channel(channel_id).await
    }

    async fn guild_channels(&self, guild_id: &str) -> Vec<Channel> {
        self.cache.guild_channels(guild_id).await
    }

    async fn self_member(&self, guild_id: &str) -> Option<Member> {
        if let Some(member) = self.cache.self_member(guild_id).await {
            return Some(member);
        }
        match self.rest.guild_member(guild_id, &self.user.id).await {
            Ok(member) => Some(member),
            Err(err) => {
                debug!(%guild_id, error = %err, "bot member lookup failed");
                None
            }
        }
    }

    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> RelayResult<Member> {
        self.rest.guild_member(guild_id, user_id).await
    }

    async fn list_members(&self, guild_id: &str, limit: u16) -> RelayResult<Vec<Member>> {
        self.rest.guild_members(guild_id, limit).await
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> RelayResult<Vec<UpstreamMessage>> {
        let guild_id = self.cache.channel(channel_id).await.map(|c| c.guild_id);
        let messages = self.rest.channel_messages(channel_id, before, limit).await?;
        Ok(messages
            .into_iter()
            .map(|raw| {
                let mut message = raw.into_message(None);
                // REST history omits guild_id
                if message.guild_id.is_none() {
                    message.guild_id = guild_id.clone();
                }
                message
            })
            .collect())
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> RelayResult<UpstreamMessage> {
        let raw = self.rest.channel_message(channel_id, message_id).await?;
        Ok(raw.into_message(None))
    }

    async fn fetch_webhook(&self, webhook_id: &str) -> RelayResult<Option<Webhook>> {
        self.rest.webhook(webhook_id).await
    }

    async fn channel_webhooks(&self, channel_id: &str) -> RelayResult<Vec<Webhook>> {
        self.rest.channel_webhooks(channel_id).await
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> RelayResult<Webhook> {
        self.rest.create_webhook(channel_id, name).await
    }

    async fn execute_webhook(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
    ) -> RelayResult<UpstreamMessage> {
        self.rest.execute_webhook(webhook, payload).await
    }

    fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        info!(bot = %self.user.id, "closing bot session");
        self.stop();
    }
}

impl Drop for DiscordConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
