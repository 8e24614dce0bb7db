//! Channel permission resolution.
//!
//! Mirrors the platform's own algorithm: guild base permissions from the
//! `@everyone` role plus the member's roles, then channel overwrites applied
//! in the order everyone, roles, member.

use serde::{Deserialize, Serialize};

use crate::types::{Channel, ChannelKind, Guild, Member, OverwriteKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const READ_MESSAGE_HISTORY: Permissions = Permissions(1 << 16);
    pub const MANAGE_WEBHOOKS: Permissions = Permissions(1 << 29);
    pub const ALL: Permissions = Permissions(u64::MAX);

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    pub fn remove(self, other: Permissions) -> Permissions {
        Permissions(self.0 & !other.0)
    }
}

pub fn guild_permissions(guild: &Guild, member: &Member) -> Permissions {
    if guild.owner_id == member.user.id {
        return Permissions::ALL;
    }

    let mut perms = guild
        .roles
        .iter()
        .find(|role| role.id == guild.id)
        .map(|role| role.permissions)
        .unwrap_or_default();

    for role in &guild.roles {
        if member.roles.iter().any(|id| id == &role.id) {
            perms = perms.union(role.permissions);
        }
    }

    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::ALL;
    }
    perms
}

pub fn channel_permissions(guild: &Guild, channel: &Channel, member: &Member) -> Permissions {
    let base = guild_permissions(guild, member);
    if base == Permissions::ALL {
        return base;
    }

    let mut perms = base;

    if let Some(everyone) = channel
        .overwrites
        .iter()
        .find(|ow| ow.kind == OverwriteKind::Role && ow.id == guild.id)
    {
        perms = perms.remove(everyone.deny).union(everyone.allow);
    }

    let mut allow = Permissions::NONE;
    let mut deny = Permissions::NONE;
    for ow in &channel.overwrites {
        if ow.kind == OverwriteKind::Role
            && ow.id != guild.id
            && member.roles.iter().any(|id| id == &ow.id)
        {
            allow = allow.union(ow.allow);
            deny = deny.union(ow.deny);
        }
    }
    perms = perms.remove(deny).union(allow);

    if let Some(own) = channel
        .overwrites
        .iter()
        .find(|ow| ow.kind == OverwriteKind::Member && ow.id == member.user.id)
    {
        perms = perms.remove(own.deny).union(own.allow);
    }

    perms
}

pub fn can_view(guild: &Guild, channel: &Channel, member: Option<&Member>) -> bool {
    member.is_some_and(|m| channel_permissions(guild, channel, m).contains(Permissions::VIEW_CHANNEL))
}

pub fn can_send(guild: &Guild, channel: &Channel, member: Option<&Member>) -> bool {
    member.is_some_and(|m| {
        channel_permissions(guild, channel, m)
            .contains(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES))
    })
}

pub fn can_read_history(guild: &Guild, channel: &Channel, member: Option<&Member>) -> bool {
    member.is_some_and(|m| {
        channel_permissions(guild, channel, m)
            .contains(Permissions::VIEW_CHANNEL.union(Permissions::READ_MESSAGE_HISTORY))
    })
}

pub fn can_manage_webhooks(guild: &Guild, channel: &Channel, member: Option<&Member>) -> bool {
    member.is_some_and(|m| {
        channel_permissions(guild, channel, m).contains(Permissions::MANAGE_WEBHOOKS)
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCategory {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(skip)]
    pub position: i32,
    pub channels: Vec<Channel>,
}

/// Text channels visible to the bot (and to `member`, when given), grouped
/// under their parent category. Uncategorized channels come first.
pub fn channels_by_category(
    guild: &Guild,
    channels: &[Channel],
    bot_member: Option<&Member>,
    member: Option<&Member>,
) -> Vec<ChannelCategory> {
    let mut accessible: Vec<&Channel> = channels
        .iter()
        .filter(|ch| matches!(ch.kind, ChannelKind::Text | ChannelKind::Announcement))
        .filter(|ch| can_view(guild, ch, bot_member))
        .filter(|ch| member.is_none() || can_view(guild, ch, member))
        .collect();
    accessible.sort_by_key(|ch| ch.position);

    let mut categories: Vec<ChannelCategory> = Vec::new();
    let mut uncategorized = Vec::new();

    for channel in accessible {
        let Some(parent_id) = channel.parent_id.as_deref() else {
            uncategorized.push(channel.clone());
            continue;
        };
        match categories
            .iter_mut()
            .find(|cat| cat.id.as_deref() == Some(parent_id))
        {
            Some(cat) => cat.channels.push(channel.clone()),
            None => {
                let parent = channels.iter().find(|ch| ch.id == parent_id);
                categories.push(ChannelCategory {
                    id: Some(parent_id.to_string()),
                    name: Some(
                        parent
                            .map(|p| p.name.clone())
                            .unwrap_or_else(|| "Unknown".to_string()),
                    ),
                    position: parent.map(|p| p.position).unwrap_or(999),
                    channels: vec![channel.clone()],
                });
            }
        }
    }

    categories.sort_by_key(|cat| cat.position);
    if !uncategorized.is_empty() {
        categories.insert(
            0,
            ChannelCategory {
                id: None,
                name: None,
                position: -1,
                channels: uncategorized,
            },
        );
    }
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{member, text_channel, guild_with_roles};
    use crate::types::{PermissionOverwrite, Role};

    fn role(id: &str, perms: Permissions, position: i32) -> Role {
        Role {
            id: id.to_string(),
            name: id.to_string(),
            color: 0,
            position,
            permissions: perms,
        }
    }

    #[test]
    fn test_owner_has_everything() {
        let mut guild = guild_with_roles("g1", vec![role("g1", Permissions::NONE, 0)]);
        guild.owner_id = "owner".to_string();
        let channel = text_channel("c1", "g1");
        let owner = member("owner", &[]);
        assert_eq!(channel_permissions(&guild, &channel, &owner), Permissions::ALL);
    }

    #[test]
    fn test_everyone_role_grants_view() {
        let guild = guild_with_roles("g1", vec![role("g1", Permissions::VIEW_CHANNEL, 0)]);
        let channel = text_channel("c1", "g1");
        let m = member("u1", &[]);
        assert!(can_view(&guild, &channel, Some(&m)));
        assert!(!can_send(&guild, &channel, Some(&m)));
    }

    #[test]
    fn test_role_overwrite_deny_beats_base() {
        let guild = guild_with_roles(
            "g1",
            vec![
                role("g1", Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES), 0),
                role("muted", Permissions::NONE, 1),
            ],
        );
        let mut channel = text_channel("c1", "g1");
        channel.overwrites.push(PermissionOverwrite {
            id: "muted".to_string(),
            kind: OverwriteKind::Role,
            allow: Permissions::NONE,
            deny: Permissions::SEND_MESSAGES,
        });
        let muted = member("u1", &["muted"]);
        let regular = member("u2", &[]);
        assert!(!can_send(&guild, &channel, Some(&muted)));
        assert!(can_send(&guild, &channel, Some(&regular)));
    }

    #[test]
    fn test_member_overwrite_applied_last() {
        let guild = guild_with_roles("g1", vec![role("g1", Permissions::NONE, 0)]);
        let mut channel = text_channel("c1", "g1");
        channel.overwrites.push(PermissionOverwrite {
            id: "g1".to_string(),
            kind: OverwriteKind::Role,
            allow: Permissions::NONE,
            deny: Permissions::VIEW_CHANNEL,
        });
        channel.overwrites.push(PermissionOverwrite {
            id: "u1".to_string(),
            kind: OverwriteKind::Member,
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::NONE,
        });
        assert!(can_view(&guild, &channel, Some(&member("u1", &[]))));
        assert!(!can_view(&guild, &channel, Some(&member("u2", &[]))));
    }

    #[test]
    fn test_administrator_bypasses_overwrites() {
        let guild = guild_with_roles(
            "g1",
            vec![
                role("g1", Permissions::NONE, 0),
                role("admin", Permissions::ADMINISTRATOR, 5),
            ],
        );
        let mut channel = text_channel("c1", "g1");
        channel.overwrites.push(PermissionOverwrite {
            id: "g1".to_string(),
            kind: OverwriteKind::Role,
            allow: Permissions::NONE,
            deny: Permissions::VIEW_CHANNEL,
        });
        assert!(can_manage_webhooks(&guild, &channel, Some(&member("u1", &["admin"]))));
    }

    #[test]
    fn test_missing_member_has_no_access() {
        let guild = guild_with_roles("g1", vec![role("g1", Permissions::ALL, 0)]);
        let channel = text_channel("c1", "g1");
        assert!(!can_view(&guild, &channel, None));
        assert!(!can_read_history(&guild, &channel, None));
    }

    #[test]
    fn test_channels_grouped_by_category() {
        let guild = guild_with_roles("g1", vec![role("g1", Permissions::VIEW_CHANNEL, 0)]);
        let mut category = text_channel("cat", "g1");
        category.kind = ChannelKind::Category;
        category.name = "General".to_string();
        category.position = 1;
        let mut a = text_channel("a", "g1");
        a.parent_id = Some("cat".to_string());
        a.position = 2;
        let mut b = text_channel("b", "g1");
        b.position = 0;
        let mut hidden = text_channel("hidden", "g1");
        hidden.overwrites.push(PermissionOverwrite {
            id: "g1".to_string(),
            kind: OverwriteKind::Role,
            allow: Permissions::NONE,
            deny: Permissions::VIEW_CHANNEL,
        });

        let bot = member("bot", &[]);
        let channels = vec![category, a, b, hidden];
        let grouped = channels_by_category(&guild, &channels, Some(&bot), None);

        assert_eq!(grouped.len(), 2);
        assert!(grouped[0].id.is_none());
        assert_eq!(grouped[0].channels[0].id, "b");
        assert_eq!(grouped[1].name.as_deref(), Some("General"));
        assert_eq!(grouped[1].channels.len(), 1);
        assert_eq!(grouped[1].channels[0].id, "a");
    }
}
