use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub color: u32,
    pub position: i32,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: String,
    pub member_count: u64,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Announcement,
    Other,
}

impl ChannelKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ChannelKind::Text,
            2 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            5 => ChannelKind::Announcement,
            _ => ChannelKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteKind {
    Role,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub id: String,
    pub kind: OverwriteKind,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub topic: Option<String>,
    /// Restricted-content flag; joining and sending require an age-verified user.
    pub nsfw: bool,
    #[serde(skip)]
    pub overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user: UpstreamUser,
    pub nick: Option<String>,
    /// Per-guild avatar hash.
    pub avatar: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub id: String,
    pub channel_id: String,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    /// Execution secret; only present for webhooks created by the caller.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    #[serde(rename = "proxyURL")]
    pub proxy_url: String,
    pub size: u64,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(rename = "iconURL")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmbedMedia {
    pub url: String,
    #[serde(rename = "proxyURL")]
    pub proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: Option<String>,
    #[serde(rename = "iconURL")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub timestamp: Option<String>,
    pub footer: Option<EmbedFooter>,
    pub image: Option<EmbedMedia>,
    pub thumbnail: Option<EmbedMedia>,
    pub author: Option<EmbedAuthor>,
    pub fields: Vec<EmbedField>,
}

/// A message as observed from an upstream connection. Update events may be
/// partial, so most fields are optional here and validated when shaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: Option<UpstreamUser>,
    /// Colour of the author's highest coloured role, if any.
    pub author_color: Option<u32>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reference_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    MessageCreate(UpstreamMessage),
    MessageUpdate(UpstreamMessage),
    MessageDelete {
        id: String,
        channel_id: String,
        guild_id: Option<String>,
    },
    TypingStart {
        channel_id: String,
        guild_id: Option<String>,
        user: Option<UpstreamUser>,
    },
    /// A member joined, left, or had roles changed.
    MemberChanged { guild_id: String, user_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPayload {
    pub content: Option<String>,
    pub username: String,
    pub avatar_url: String,
    pub files: Vec<OutgoingFile>,
}

/// Identity of an authenticated browser user, loaded from the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    pub age_verified: bool,
}

impl SessionUser {
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }

    pub fn avatar_url(&self) -> String {
        avatar_url(&self.id, self.avatar.as_deref())
    }
}

/// CDN avatar for a user, falling back to the default avatar bucket derived
/// from the snowflake's timestamp bits.
pub fn avatar_url(user_id: &str, avatar: Option<&str>) -> String {
    match avatar {
        Some(hash) => format!("{CDN_BASE}/avatars/{user_id}/{hash}.png"),
        None => {
            let bucket = user_id.parse::<u64>().map(|id| (id >> 22) % 6).unwrap_or(0);
            format!("{CDN_BASE}/embed/avatars/{bucket}.png")
        }
    }
}

/// Colour of the highest-positioned coloured role among `member_roles`.
pub fn role_color(roles: &[Role], member_roles: &[String]) -> Option<u32> {
    roles
        .iter()
        .filter(|role| role.color != 0 && member_roles.contains(&role.id))
        .max_by_key(|role| role.position)
        .map(|role| role.color)
}

pub fn color_hex(color: u32) -> Option<String> {
    (color != 0).then(|| format!("#{color:06x}"))
}
