//! Live view of one bot's guilds, fed by gateway dispatches.

use std::collections::{HashMap, HashSet};

use relay_core::types::{role_color, Channel, Guild, Member, Role, UpstreamEvent};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::{
    RawChannel, RawGuild, RawMember, RawMessage, RawRole, RawUser, UnavailableGuild,
};

#[derive(Deserialize)]
struct Ready {
    guilds: Vec<UnavailableGuild>,
}

#[derive(Deserialize)]
struct RoleEvent {
    guild_id: String,
    role: RawRole,
}

#[derive(Deserialize)]
struct RoleDelete {
    guild_id: String,
    role_id: String,
}

#[derive(Deserialize)]
struct MemberEvent {
    guild_id: String,
    #[serde(flatten)]
    member: RawMember,
}

#[derive(Deserialize)]
struct MemberRemove {
    guild_id: String,
    user: RawUser,
}

#[derive(Deserialize)]
struct MessageDelete {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Deserialize)]
struct TypingStart {
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    member: Option<RawMember>,
}

#[derive(Default)]
struct CacheState {
    guilds: HashMap<String, Guild>,
    channels: HashMap<String, Channel>,
    self_members: HashMap<String, Member>,
    /// Guilds announced by READY that have not been delivered yet. `None`
    /// until READY arrives.
    awaiting: Option<HashSet<String>>,
}

impl CacheState {
    fn insert_guild(&mut self, self_id: &str, raw: RawGuild) {
        let guild = raw.guild();
        self.channels.retain(|_, channel| channel.guild_id != guild.id);
        for channel in raw.channels {
            let channel = channel.into_channel(&guild.id);
            self.channels.insert(channel.id.clone(), channel);
        }
        if let Some(me) = raw
            .members
            .into_iter()
            .filter_map(RawMember::into_member)
            .find(|member| member.user.id == self_id)
        {
            self.self_members.insert(guild.id.clone(), me);
        }
        self.guilds.insert(guild.id.clone(), guild);
    }

    fn remove_guild(&mut self, guild_id: &str) {
        self.guilds.remove(guild_id);
        self.self_members.remove(guild_id);
        self.channels.retain(|_, channel| channel.guild_id != guild_id);
    }

    fn settle(&mut self, guild_id: &str) {
        if let Some(awaiting) = self.awaiting.as_mut() {
            awaiting.remove(guild_id);
        }
    }
}

pub struct GuildCache {
    self_id: String,
    state: RwLock<CacheState>,
}

impl GuildCache {
    pub fn new(self_id: &str) -> Self {
        Self {
            self_id: self_id.to_string(),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Folds one dispatch into the cache and returns the relay-facing event it
    /// maps to, if any.
    pub async fn apply(&self, event: &str, data: Value) -> Option<UpstreamEvent> {
        match self.try_apply(event, data).await {
            Ok(mapped) => mapped,
            Err(err) => {
                warn!(%event, error = %err, "undecodable gateway dispatch");
                None
            }
        }
    }

    async fn try_apply(&self, event: &str, data: Value) -> serde_json::Result<Option<UpstreamEvent>> {
        let mut state = self.state.write().await;
        match event {
            "READY" => {
                let ready: Ready = serde_json::from_value(data)?;
                state.awaiting = Some(ready.guilds.into_iter().map(|g| g.id).collect());
            }
            "GUILD_CREATE" => {
                if data.get("unavailable").and_then(Value::as_bool) == Some(true) {
                    let stub: UnavailableGuild = serde_json::from_value(data)?;
                    state.settle(&stub.id);
                    return Ok(None);
                }
                let raw: RawGuild = serde_json::from_value(data)?;
                state.settle(&raw.id);
                state.insert_guild(&self.self_id, raw);
            }
            "GUILD_UPDATE" => {
                let raw: RawGuild = serde_json::from_value(data)?;
                let mut guild = raw.guild();
                if raw.member_count.is_none() && raw.approximate_member_count.is_none() {
                    if let Some(old) = state.guilds.get(&guild.id) {
                        guild.member_count = old.member_count;
                    }
                }
                state.guilds.insert(guild.id.clone(), guild);
            }
            "GUILD_DELETE" => {
                let stub: UnavailableGuild = serde_json::from_value(data)?;
                state.remove_guild(&stub.id);
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                let raw: RawChannel = serde_json::from_value(data)?;
                if let Some(guild_id) = raw.guild_id.clone() {
                    let channel = raw.into_channel(&guild_id);
                    state.channels.insert(channel.id.clone(), channel);
                }
            }
            "CHANNEL_DELETE" => {
                let raw: RawChannel = serde_json::from_value(data)?;
                state.channels.remove(&raw.id);
            }
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                let ev: RoleEvent = serde_json::from_value(data)?;
                if let Some(guild) = state.guilds.get_mut(&ev.guild_id) {
                    let role = Role::from(ev.role);
                    guild.roles.retain(|r| r.id != role.id);
                    guild.roles.push(role);
                }
            }
            "GUILD_ROLE_DELETE" => {
                let ev: RoleDelete = serde_json::from_value(data)?;
                if let Some(guild) = state.guilds.get_mut(&ev.guild_id) {
                    guild.roles.retain(|r| r.id != ev.role_id);
                }
            }
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
                let ev: MemberEvent = serde_json::from_value(data)?;
                let Some(member) = ev.member.into_member() else {
                    return Ok(None);
                };
                if event == "GUILD_MEMBER_ADD" {
                    if let Some(guild) = state.guilds.get_mut(&ev.guild_id) {
                        guild.member_count += 1;
                    }
                }
                let user_id = member.user.id.clone();
                if user_id == self.self_id {
                    state.self_members.insert(ev.guild_id.clone(), member);
                }
                return Ok(Some(UpstreamEvent::MemberChanged {
                    guild_id: ev.guild_id,
                    user_id,
                }));
            }
            "GUILD_MEMBER_REMOVE" => {
                let ev: MemberRemove = serde_json::from_value(data)?;
                if let Some(guild) = state.guilds.get_mut(&ev.guild_id) {
                    guild.member_count = guild.member_count.saturating_sub(1);
                }
                if ev.user.id == self.self_id {
                    state.self_members.remove(&ev.guild_id);
                }
                return Ok(Some(UpstreamEvent::MemberChanged {
                    guild_id: ev.guild_id,
                    user_id: ev.user.id,
                }));
            }
            "MESSAGE_CREATE" | "MESSAGE_UPDATE" => {
                let raw: RawMessage = serde_json::from_value(data)?;
                let color = match (&raw.guild_id, &raw.member) {
                    (Some(guild_id), Some(member)) => state
                        .guilds
                        .get(guild_id)
                        .and_then(|guild| role_color(&guild.roles, &member.roles)),
                    _ => None,
                };
                let message = raw.into_message(color);
                return Ok(Some(if event == "MESSAGE_CREATE" {
                    UpstreamEvent::MessageCreate(message)
                } else {
                    UpstreamEvent::MessageUpdate(message)
                }));
            }
            "MESSAGE_DELETE" => {
                let ev: MessageDelete = serde_json::from_value(data)?;
                return Ok(Some(UpstreamEvent::MessageDelete {
                    id: ev.id,
                    channel_id: ev.channel_id,
                    guild_id: ev.guild_id,
                }));
            }
            "TYPING_START" => {
                let ev: TypingStart = serde_json::from_value(data)?;
                return Ok(Some(UpstreamEvent::TypingStart {
                    channel_id: ev.channel_id,
                    guild_id: ev.guild_id,
                    user: ev
                        .member
                        .and_then(RawMember::into_member)
                        .map(|member| member.user),
                }));
            }
            other => debug!(event = other, "ignored dispatch"),
        }
        Ok(None)
    }

    /// True once every guild announced by READY has been delivered.
    pub async fn is_settled(&self) -> bool {
        self.state
            .read()
            .await
            .awaiting
            .as_ref()
            .is_some_and(HashSet::is_empty)
    }

    pub async fn guild(&self, guild_id: &str) -> Option<Guild> {
        self.state.read().await.guilds.get(guild_id).cloned()
    }

    pub async fn guilds(&self) -> Vec<Guild> {
        let mut guilds: Vec<Guild> = self.state.read().await.guilds.values().cloned().collect();
        guilds.sort_by(|a, b| a.name.cmp(&b.name));
        guilds
    }

    pub async fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.state.read().await.channels.get(channel_id).cloned()
    }

    pub async fn guild_channels(&self, guild_id: &str) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .state
            .read()
            .await
            .channels
            .values()
            .filter(|channel| channel.guild_id == guild_id)
            .cloned()
            .collect();
        channels.sort_by_key(|channel| channel.position);
        channels
    }

    pub async fn self_member(&self, guild_id: &str) -> Option<Member> {
        self.state.read().await.self_members.get(guild_id).cloned()
    }
}
