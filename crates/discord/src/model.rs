//! Discord API v10 payloads and their conversion into relay types.

use chrono::{DateTime, Utc};
use relay_core::permissions::Permissions;
use relay_core::types::{
    Attachment, Channel, ChannelKind, Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia,
    Guild, Member, OverwriteKind, PermissionOverwrite, Role, UpstreamMessage, UpstreamUser,
    Webhook,
};
use serde::{Deserialize, Deserializer};

/// Permission bitsets arrive as decimal strings.
fn permission_bits<'de, D: Deserializer<'de>>(de: D) -> Result<Permissions, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Bits {
        Text(String),
        Number(u64),
    }
    match Bits::deserialize(de)? {
        Bits::Text(raw) => raw
            .parse()
            .map(Permissions)
            .map_err(serde::de::Error::custom),
        Bits::Number(n) => Ok(Permissions(n)),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl From<RawUser> for UpstreamUser {
    fn from(raw: RawUser) -> Self {
        UpstreamUser {
            id: raw.id,
            username: raw.username,
            global_name: raw.global_name,
            avatar: raw.avatar,
            bot: raw.bot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub position: i32,
    #[serde(deserialize_with = "permission_bits")]
    pub permissions: Permissions,
}

impl From<RawRole> for Role {
    fn from(raw: RawRole) -> Self {
        Role {
            id: raw.id,
            name: raw.name,
            color: raw.color,
            position: raw.position,
            permissions: raw.permissions,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOverwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(deserialize_with = "permission_bits")]
    pub allow: Permissions,
    #[serde(deserialize_with = "permission_bits")]
    pub deny: Permissions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub permission_overwrites: Vec<RawOverwrite>,
}

impl RawChannel {
    /// Channels nested in a guild payload omit `guild_id`.
    pub fn into_channel(self, guild_id: &str) -> Channel {
        Channel {
            id: self.id,
            guild_id: self.guild_id.unwrap_or_else(|| guild_id.to_string()),
            name: self.name.unwrap_or_default(),
            kind: ChannelKind::from_raw(self.kind),
            position: self.position,
            parent_id: self.parent_id,
            topic: self.topic,
            nsfw: self.nsfw,
            overwrites: self
                .permission_overwrites
                .into_iter()
                .map(|ow| PermissionOverwrite {
                    id: ow.id,
                    kind: if ow.kind == 1 {
                        OverwriteKind::Member
                    } else {
                        OverwriteKind::Role
                    },
                    allow: ow.allow,
                    deny: ow.deny,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMember {
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RawMember {
    /// `None` for partial members that don't carry the user.
    pub fn into_member(self) -> Option<Member> {
        Some(Member {
            user: self.user?.into(),
            nick: self.nick,
            avatar: self.avatar,
            roles: self.roles,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGuild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
    #[serde(default)]
    pub roles: Vec<RawRole>,
    #[serde(default)]
    pub channels: Vec<RawChannel>,
    #[serde(default)]
    pub members: Vec<RawMember>,
}

impl RawGuild {
    pub fn guild(&self) -> Guild {
        Guild {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            owner_id: self.owner_id.clone(),
            member_count: self
                .member_count
                .or(self.approximate_member_count)
                .unwrap_or_default(),
            roles: self.roles.iter().cloned().map(Role::from).collect(),
        }
    }
}

/// Unavailable guild stub from READY / GUILD_DELETE.
#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub proxy_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl From<RawAttachment> for Attachment {
    fn from(raw: RawAttachment) -> Self {
        Attachment {
            id: raw.id,
            filename: raw.filename,
            url: raw.url,
            proxy_url: raw.proxy_url,
            size: raw.size,
            content_type: raw.content_type,
            width: raw.width,
            height: raw.height,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbedFooter {
    pub text: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbedMedia {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl RawEmbedMedia {
    fn into_media(self) -> Option<EmbedMedia> {
        Some(EmbedMedia {
            url: self.url?,
            proxy_url: self.proxy_url,
            width: self.width,
            height: self.height,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbedAuthor {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub footer: Option<RawEmbedFooter>,
    #[serde(default)]
    pub image: Option<RawEmbedMedia>,
    #[serde(default)]
    pub thumbnail: Option<RawEmbedMedia>,
    #[serde(default)]
    pub author: Option<RawEmbedAuthor>,
    #[serde(default)]
    pub fields: Vec<RawEmbedField>,
}

impl From<RawEmbed> for Embed {
    fn from(raw: RawEmbed) -> Self {
        Embed {
            title: raw.title,
            description: raw.description,
            url: raw.url,
            color: raw.color,
            timestamp: raw.timestamp,
            footer: raw.footer.map(|f| EmbedFooter {
                text: f.text,
                icon_url: f.icon_url,
            }),
            image: raw.image.and_then(RawEmbedMedia::into_media),
            // clients only get the thumbnail urls
            thumbnail: raw.thumbnail.and_then(RawEmbedMedia::into_media).map(|t| EmbedMedia {
                width: None,
                height: None,
                ..t
            }),
            author: raw.author.map(|a| EmbedAuthor {
                name: a.name,
                url: a.url,
                icon_url: a.icon_url,
            }),
            fields: raw
                .fields
                .into_iter()
                .map(|f| EmbedField {
                    name: f.name,
                    value: f.value,
                    inline: f.inline,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessageReference {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub author: Option<RawUser>,
    #[serde(default)]
    pub member: Option<RawMember>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub embeds: Vec<RawEmbed>,
    #[serde(default)]
    pub message_reference: Option<RawMessageReference>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub webhook_id: Option<String>,
}

impl RawMessage {
    pub fn into_message(self, author_color: Option<u32>) -> UpstreamMessage {
        UpstreamMessage {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author: self.author.map(UpstreamUser::from),
            author_color,
            content: self.content.unwrap_or_default(),
            attachments: self.attachments.into_iter().map(Attachment::from).collect(),
            embeds: self.embeds.into_iter().map(Embed::from).collect(),
            reference_id: self.message_reference.and_then(|r| r.message_id),
            created_at: self.timestamp,
            edited_at: self.edited_timestamp,
            webhook_id: self.webhook_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWebhook {
    pub id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub token: Option<String>,
}

impl RawWebhook {
    pub fn into_webhook(self, channel_id: &str) -> Webhook {
        Webhook {
            id: self.id,
            channel_id: self.channel_id.unwrap_or_else(|| channel_id.to_string()),
            name: self.name,
            owner_id: self.user.map(|u| u.id),
            token: self.token,
        }
    }
}
