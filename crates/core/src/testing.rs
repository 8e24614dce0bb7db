//! In-memory upstream and storage doubles used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::endpoint::{EndpointRecord, EndpointStore};
use crate::error::{RelayError, RelayResult};
use crate::permissions::Permissions;
use crate::types::{
    Channel, ChannelKind, Guild, Member, Role, UpstreamEvent, UpstreamMessage, UpstreamUser,
    Webhook, WebhookPayload,
};
use crate::upstream::{Connector, Upstream};

pub fn user(id: &str) -> UpstreamUser {
    UpstreamUser {
        id: id.to_string(),
        username: id.to_string(),
        global_name: None,
        avatar: None,
        bot: false,
    }
}

pub fn member(user_id: &str, roles: &[&str]) -> Member {
    Member {
        user: user(user_id),
        nick: None,
        avatar: None,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

pub fn guild_with_roles(id: &str, roles: Vec<Role>) -> Guild {
    Guild {
        id: id.to_string(),
        name: format!("guild {id}"),
        icon: None,
        owner_id: "guild-owner".to_string(),
        member_count: 0,
        roles,
    }
}

/// A guild whose `@everyone` role can read, post and manage webhooks.
pub fn guild(id: &str) -> Guild {
    guild_with_roles(
        id,
        vec![Role {
            id: id.to_string(),
            name: "@everyone".to_string(),
            color: 0,
            position: 0,
            permissions: Permissions::VIEW_CHANNEL
                .union(Permissions::SEND_MESSAGES)
                .union(Permissions::READ_MESSAGE_HISTORY)
                .union(Permissions::MANAGE_WEBHOOKS),
        }],
    )
}

pub fn text_channel(id: &str, guild_id: &str) -> Channel {
    Channel {
        id: id.to_string(),
        guild_id: guild_id.to_string(),
        name: id.to_string(),
        kind: ChannelKind::Text,
        position: 0,
        parent_id: None,
        topic: None,
        nsfw: false,
        overwrites: Vec::new(),
    }
}

pub fn message(id: &str, channel_id: &str, guild_id: &str, author_id: &str) -> UpstreamMessage {
    UpstreamMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        guild_id: Some(guild_id.to_string()),
        author: Some(user(author_id)),
        content: format!("message {id}"),
        created_at: Some(Utc::now()),
        ..Default::default()
    }
}

#[derive(Default)]
struct FakeState {
    guilds: Vec<Guild>,
    channels: Vec<Channel>,
    members: HashMap<(String, String), Member>,
    self_members: HashMap<String, Member>,
    webhooks: Vec<Webhook>,
    messages: HashMap<String, Vec<UpstreamMessage>>,
    message_delays: HashMap<String, Duration>,
    executed: Vec<WebhookPayload>,
}

pub struct FakeUpstream {
    identity: UpstreamUser,
    state: Mutex<FakeState>,
    events: broadcast::Sender<UpstreamEvent>,
    next_id: AtomicU64,
    member_fetches: AtomicUsize,
    webhooks_created: AtomicUsize,
    failing_executions: AtomicUsize,
    shut_down: AtomicBool,
}

impl FakeUpstream {
    pub fn new(bot_id: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        let mut identity = user(bot_id);
        identity.bot = true;
        Self {
            identity,
            state: Mutex::new(FakeState::default()),
            events,
            next_id: AtomicU64::new(1000),
            member_fetches: AtomicUsize::new(0),
            webhooks_created: AtomicUsize::new(0),
            failing_executions: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub async fn add_guild(&self, guild: Guild) {
        self.state().guilds.push(guild);
    }

    pub async fn add_channel(&self, channel: Channel) {
        let mut state = self.state();
        state.channels.retain(|c| c.id != channel.id);
        state.channels.push(channel);
    }

    pub async fn add_member(&self, guild_id: &str, member: Member) {
        self.state()
            .members
            .insert((guild_id.to_string(), member.user.id.clone()), member);
    }

    pub async fn remove_member(&self, guild_id: &str, user_id: &str) {
        self.state()
            .members
            .remove(&(guild_id.to_string(), user_id.to_string()));
    }

    pub async fn set_self_member(&self, guild_id: &str, member: Member) {
        self.state().self_members.insert(guild_id.to_string(), member);
    }

    pub async fn add_message(&self, message: UpstreamMessage) {
        self.state()
            .messages
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    /// Slows down lookups of one message.
    pub fn delay_message(&self, message_id: &str, delay: Duration) {
        self.state()
            .message_delays
            .insert(message_id.to_string(), delay);
    }

    pub async fn delete_webhook(&self, webhook_id: &str) {
        self.state().webhooks.retain(|w| w.id != webhook_id);
    }

    /// Makes the next `n` webhook executions fail.
    pub fn fail_next_executions(&self, n: usize) {
        self.failing_executions.store(n, Ordering::SeqCst);
    }

    pub fn emit(&self, event: UpstreamEvent) {
        let _ = self.events.send(event);
    }

    pub fn member_fetches(&self) -> usize {
        self.member_fetches.load(Ordering::SeqCst)
    }

    pub fn webhooks_created(&self) -> usize {
        self.webhooks_created.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<WebhookPayload> {
        self.state().executed.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn identity(&self) -> &UpstreamUser {
        &self.identity
    }

    async fn guild(&self, guild_id: &str) -> Option<Guild> {
        self.state().guilds.iter().find(|g| g.id == guild_id).cloned()
    }

    async fn guilds(&self) -> Vec<Guild> {
        self.state().guilds.clone()
    }

    async fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.state()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
    }

    async fn guild_channels(&self, guild_id: &str) -> Vec<Channel> {
        self.state()
            .channels
            .iter()
            .filter(|c| c.guild_id == guild_id)
            .cloned()
            .collect()
    }

    async fn self_member(&self, guild_id: &str) -> Option<Member> {
        let state = self.state();
        if !state.guilds.iter().any(|g| g.id == guild_id) {
            return None;
        }
        Some(
            state
                .self_members
                .get(guild_id)
                .cloned()
                .unwrap_or_else(|| member(&self.identity.id, &[])),
        )
    }

    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> RelayResult<Member> {
        self.member_fetches.fetch_add(1, Ordering::SeqCst);
        self.state()
            .members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
            .ok_or_else(|| RelayError::NotFound("Member".to_string()))
    }

    async fn list_members(&self, guild_id: &str, limit: u16) -> RelayResult<Vec<Member>> {
        Ok(self
            .state()
            .members
            .iter()
            .filter(|((g, _), _)| g == guild_id)
            .map(|(_, m)| m.clone())
            .take(limit as usize)
            .collect())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> RelayResult<Vec<UpstreamMessage>> {
        let state = self.state();
        let stored = state.messages.get(channel_id).cloned().unwrap_or_default();
        let end = before
            .and_then(|id| stored.iter().position(|m| m.id == id))
            .unwrap_or(stored.len());
        Ok(stored[..end]
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> RelayResult<UpstreamMessage> {
        let delay = self.state().message_delays.get(message_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .messages
            .get(channel_id)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message_id).cloned())
            .ok_or_else(|| RelayError::NotFound("Message".to_string()))
    }

    async fn fetch_webhook(&self, webhook_id: &str) -> RelayResult<Option<Webhook>> {
        Ok(self
            .state()
            .webhooks
            .iter()
            .find(|w| w.id == webhook_id)
            .cloned())
    }

    async fn channel_webhooks(&self, channel_id: &str) -> RelayResult<Vec<Webhook>> {
        Ok(self
            .state()
            .webhooks
            .iter()
            .filter(|w| w.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> RelayResult<Webhook> {
        self.webhooks_created.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id();
        let webhook = Webhook {
            token: Some(format!("secret-{id}")),
            id,
            channel_id: channel_id.to_string(),
            name: Some(name.to_string()),
            owner_id: Some(self.identity.id.clone()),
        };
        self.state().webhooks.push(webhook.clone());
        Ok(webhook)
    }

    async fn execute_webhook(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
    ) -> RelayResult<UpstreamMessage> {
        let failing = self
            .failing_executions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RelayError::UpstreamUnavailable("injected failure".to_string()));
        }

        let mut state = self.state();
        if !state.webhooks.iter().any(|w| w.id == webhook.id) {
            return Err(RelayError::NotFound("Webhook".to_string()));
        }

        let channel_id = webhook.channel_id.clone();
        let guild_id = state
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| c.guild_id.clone());
        let message = UpstreamMessage {
            id: self.next_id(),
            channel_id: channel_id.clone(),
            guild_id,
            author: Some(UpstreamUser {
                id: webhook.id.clone(),
                username: payload.username.clone(),
                global_name: None,
                avatar: None,
                bot: true,
            }),
            content: payload.content.clone().unwrap_or_default(),
            created_at: Some(Utc::now()),
            webhook_id: Some(webhook.id.clone()),
            ..Default::default()
        };
        state.executed.push(payload);
        state
            .messages
            .entry(channel_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Hands out pre-built fakes keyed by credential.
#[derive(Default)]
pub struct FakeConnector {
    upstreams: HashMap<String, Arc<FakeUpstream>>,
}

impl FakeConnector {
    pub fn with<'a>(entries: impl IntoIterator<Item = (&'a str, Arc<FakeUpstream>)>) -> Self {
        Self {
            upstreams: entries
                .into_iter()
                .map(|(credential, upstream)| (credential.to_string(), upstream))
                .collect(),
        }
    }

    fn lookup(&self, credential: &str) -> RelayResult<Arc<FakeUpstream>> {
        self.upstreams
            .get(credential)
            .cloned()
            .ok_or_else(|| RelayError::Unauthenticated("Invalid bot token".to_string()))
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn identify(&self, credential: &str) -> RelayResult<UpstreamUser> {
        Ok(self.lookup(credential)?.identity.clone())
    }

    async fn connect(&self, credential: &str) -> RelayResult<Arc<dyn Upstream>> {
        let upstream: Arc<dyn Upstream> = self.lookup(credential)?;
        Ok(upstream)
    }
}

#[derive(Default)]
pub struct MemoryEndpointStore {
    records: Mutex<HashMap<String, EndpointRecord>>,
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn get(&self, channel_id: &str) -> RelayResult<Option<EndpointRecord>> {
        Ok(self.records.lock().unwrap().get(channel_id).cloned())
    }

    async fn put(&self, record: &EndpointRecord) -> RelayResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.channel_id.clone(), record.clone());
        Ok(())
    }
}
