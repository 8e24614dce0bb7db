pub mod admin;
pub mod auth;
pub mod channels;
pub mod guilds;
pub mod health;

use std::sync::Arc;

use axum::Router;
use relay_core::types::{Guild, Member, SessionUser};
use relay_core::upstream::Upstream;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(auth::router(state.clone()))
        .merge(guilds::router(state.clone()))
        .merge(channels::router(state.clone()))
        .merge(admin::router(state))
}

pub fn health_router(state: AppState) -> Router {
    health::router(state)
}

#[derive(Debug, Serialize)]
pub(crate) struct SuccessResponse {
    success: bool,
}

impl SuccessResponse {
    pub(crate) fn ok() -> Self {
        Self { success: true }
    }
}

pub(crate) struct GuildAccess {
    pub upstream: Arc<dyn Upstream>,
    pub guild: Guild,
    pub member: Member,
}

/// The guild, its owning connection and the caller's member record.
pub(crate) async fn guild_access(
    state: &AppState,
    user: &SessionUser,
    guild_id: &str,
) -> Result<GuildAccess, AppError> {
    let (upstream, guild) = state
        .registry
        .find_guild(guild_id)
        .await
        .ok_or_else(|| AppError::NotFound("Guild not found".to_string()))?;
    let member = state
        .registry
        .member_cache()
        .fetch(upstream.as_ref(), guild_id, &user.id)
        .await
        .ok_or_else(|| AppError::Forbidden("Not a member of this server".to_string()))?;
    Ok(GuildAccess {
        upstream,
        guild,
        member,
    })
}
