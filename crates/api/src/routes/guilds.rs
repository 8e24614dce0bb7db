use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use relay_core::permissions::{channels_by_category, ChannelCategory};
use relay_core::types::{color_hex, role_color, Guild, Member};
use serde::Serialize;

use crate::{
    error::{ApiResult, AppError},
    middleware::auth::AuthUser,
    routes::guild_access,
    state::{AppState, RequestId},
};

const MEMBER_LIST_LIMIT: u16 = 1000;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/guilds", get(list_guilds))
        .route("/api/guilds/{guild_id}/info", get(guild_info))
        .route("/api/guilds/{guild_id}/channels", get(guild_channels))
        .route("/api/guilds/{guild_id}/members", get(guild_members))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GuildSummary {
    id: String,
    name: String,
    icon: Option<String>,
    member_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GuildInfoResponse {
    id: String,
    name: String,
    icon: Option<String>,
    member_count: u64,
    owner_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberRole {
    id: String,
    name: String,
    color: Option<String>,
    position: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberItem {
    id: String,
    username: String,
    global_name: Option<String>,
    nickname: Option<String>,
    avatar: Option<String>,
    guild_avatar: Option<String>,
    bot: bool,
    /// Highest first, `@everyone` excluded.
    roles: Vec<MemberRole>,
    highest_role_color: Option<String>,
    is_owner: bool,
}

impl MemberItem {
    fn from_member(guild: &Guild, member: Member) -> Self {
        let mut roles: Vec<MemberRole> = guild
            .roles
            .iter()
            .filter(|role| role.id != guild.id && member.roles.contains(&role.id))
            .map(|role| MemberRole {
                id: role.id.clone(),
                name: role.name.clone(),
                color: color_hex(role.color),
                position: role.position,
            })
            .collect();
        roles.sort_by(|a, b| b.position.cmp(&a.position));

        Self {
            highest_role_color: role_color(&guild.roles, &member.roles).and_then(color_hex),
            is_owner: member.user.id == guild.owner_id,
            id: member.user.id,
            username: member.user.username,
            global_name: member.user.global_name.filter(|name| !name.is_empty()),
            nickname: member.nick,
            avatar: member.user.avatar,
            guild_avatar: member.avatar,
            bot: member.user.bot,
            roles,
        }
    }

    fn top_position(&self) -> i32 {
        self.roles.first().map(|role| role.position).unwrap_or(-1)
    }

    fn sort_name(&self) -> String {
        self.nickname
            .as_deref()
            .or(self.global_name.as_deref())
            .unwrap_or(&self.username)
            .to_lowercase()
    }
}

/// Owner first, then by highest role, then by shown name.
fn sort_members(members: &mut [MemberItem]) {
    members.sort_by(|a, b| {
        b.is_owner
            .cmp(&a.is_owner)
            .then_with(|| b.top_position().cmp(&a.top_position()))
            .then_with(|| a.sort_name().cmp(&b.sort_name()))
    });
}

async fn list_guilds(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<Vec<GuildSummary>> {
    let mut seen = HashSet::new();
    let mut guilds = Vec::new();

    for connection in state.registry.all().await {
        for guild in connection.upstream.guilds().await {
            // first registered connection owns a shared guild
            if !seen.insert(guild.id.clone()) {
                continue;
            }
            let member = state
                .registry
                .member_cache()
                .fetch(connection.upstream.as_ref(), &guild.id, &user.id)
                .await;
            if member.is_some() {
                guilds.push(GuildSummary {
                    id: guild.id,
                    name: guild.name,
                    icon: guild.icon,
                    member_count: guild.member_count,
                });
            }
        }
    }

    Json(guilds)
}

async fn guild_info(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<GuildInfoResponse>> {
    let access = guild_access(&state, &user, &guild_id)
        .await
        .map_err(|err| err.with_request_id(&request_id.0))?;
    let guild = access.guild;

    Ok(Json(GuildInfoResponse {
        id: guild.id,
        name: guild.name,
        icon: guild.icon,
        member_count: guild.member_count,
        owner_id: guild.owner_id,
    }))
}

async fn guild_channels(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Vec<ChannelCategory>>> {
    let access = guild_access(&state, &user, &guild_id)
        .await
        .map_err(|err| err.with_request_id(&request_id.0))?;

    let channels = access.upstream.guild_channels(&guild_id).await;
    let bot_member = access.upstream.self_member(&guild_id).await;

    Ok(Json(channels_by_category(
        &access.guild,
        &channels,
        bot_member.as_ref(),
        Some(&access.member),
    )))
}

async fn guild_members(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Vec<MemberItem>>> {
    let access = guild_access(&state, &user, &guild_id)
        .await
        .map_err(|err| err.with_request_id(&request_id.0))?;

    let members = access
        .upstream
        .list_members(&guild_id, MEMBER_LIST_LIMIT)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?;

    let mut items: Vec<MemberItem> = members
        .into_iter()
        .map(|member| MemberItem::from_member(&access.guild, member))
        .collect();
    sort_members(&mut items);

    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::permissions::Permissions;
    use relay_core::types::{Role, UpstreamUser};

    fn role(id: &str, color: u32, position: i32) -> Role {
        Role {
            id: id.to_string(),
            name: id.to_string(),
            color,
            position,
            permissions: Permissions::NONE,
        }
    }

    fn guild() -> Guild {
        Guild {
            id: "g1".to_string(),
            name: "Guild".to_string(),
            icon: None,
            owner_id: "owner".to_string(),
            member_count: 4,
            roles: vec![role("g1", 0, 0), role("mods", 0x3498db, 5), role("vip", 0, 2)],
        }
    }

    fn member(id: &str, username: &str, nick: Option<&str>, roles: &[&str]) -> Member {
        Member {
            user: UpstreamUser {
                id: id.to_string(),
                username: username.to_string(),
                global_name: None,
                avatar: None,
                bot: false,
            },
            nick: nick.map(str::to_string),
            avatar: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_member_item_roles_and_color() {
        let item = MemberItem::from_member(&guild(), member("u1", "nelly", None, &["g1", "vip", "mods"]));
        let ids: Vec<&str> = item.roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["mods", "vip"]);
        assert_eq!(item.highest_role_color.as_deref(), Some("#3498db"));
        assert_eq!(item.roles[1].color, None);
        assert!(!item.is_owner);
    }

    #[test]
    fn test_member_sort_order() {
        let guild = guild();
        let mut items: Vec<MemberItem> = vec![
            member("u1", "zed", None, &[]),
            member("u2", "amy", None, &["vip"]),
            member("owner", "boss", None, &[]),
            member("u3", "carl", Some("Al"), &[]),
            member("u4", "mia", None, &["mods"]),
        ]
        .into_iter()
        .map(|m| MemberItem::from_member(&guild, m))
        .collect();

        sort_members(&mut items);
        let order: Vec<&str> = items.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["owner", "u4", "u2", "u3", "u1"]);
    }
}
