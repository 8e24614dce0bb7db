use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use relay_core::permissions::{can_manage_webhooks, can_read_history, can_send, can_view};
use relay_core::protocol::RelayMessage;
use relay_core::relay::shape_message;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiResult, AppError},
    middleware::auth::AuthUser,
    state::{AppState, RequestId},
};

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 100;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/channels/{channel_id}/messages", get(channel_messages))
        .route("/api/channels/{channel_id}/can-send", get(can_send_here))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    before: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CanSendResponse {
    can_send: bool,
    nsfw: bool,
}

fn page_size(limit: Option<u32>) -> u8 {
    // MAX_PAGE fits in a u8
    limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE) as u8
}

/// History page, oldest first.
async fn channel_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(channel_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<RelayMessage>>> {
    let fail = |err: AppError| err.with_request_id(&request_id.0);

    let (upstream, channel) = state
        .registry
        .find_channel(&channel_id)
        .await
        .ok_or_else(|| fail(AppError::NotFound("Channel not found".to_string())))?;
    let guild = upstream
        .guild(&channel.guild_id)
        .await
        .ok_or_else(|| fail(AppError::NotFound("Guild not found".to_string())))?;

    let bot_member = upstream.self_member(&guild.id).await;
    if !can_view(&guild, &channel, bot_member.as_ref()) {
        return Err(fail(AppError::Forbidden("No access".to_string())));
    }

    let member = state
        .registry
        .member_cache()
        .fetch(upstream.as_ref(), &guild.id, &user.id)
        .await
        .ok_or_else(|| fail(AppError::Forbidden("Not a member of this server".to_string())))?;
    if !can_read_history(&guild, &channel, Some(&member)) {
        return Err(fail(AppError::Forbidden(
            "No access to this channel".to_string(),
        )));
    }
    if channel.nsfw && !user.age_verified {
        return Err(fail(AppError::AgeRestricted));
    }

    let messages = upstream
        .fetch_messages(&channel.id, query.before.as_deref(), page_size(query.limit))
        .await
        .map_err(|err| fail(AppError::from(err)))?;

    let mut shaped: Vec<RelayMessage> = messages.iter().filter_map(shape_message).collect();
    shaped.reverse();
    Ok(Json(shaped))
}

/// Whether the caller could post here: the bot must manage webhooks and the
/// user must hold send rights.
async fn can_send_here(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<CanSendResponse>> {
    let (upstream, channel) = state
        .registry
        .find_channel(&channel_id)
        .await
        .ok_or_else(|| {
            AppError::NotFound("Channel not found".to_string()).with_request_id(&request_id.0)
        })?;
    let Some(guild) = upstream.guild(&channel.guild_id).await else {
        return Ok(Json(CanSendResponse {
            can_send: false,
            nsfw: channel.nsfw,
        }));
    };

    let bot_member = upstream.self_member(&guild.id).await;
    let member = state
        .registry
        .member_cache()
        .fetch(upstream.as_ref(), &guild.id, &user.id)
        .await;

    let allowed = can_manage_webhooks(&guild, &channel, bot_member.as_ref())
        && member.is_some()
        && can_send(&guild, &channel, member.as_ref());

    Ok(Json(CanSendResponse {
        can_send: allowed,
        nsfw: channel.nsfw,
    }))
}
