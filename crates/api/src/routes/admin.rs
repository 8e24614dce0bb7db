use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use relay_core::types::SessionUser;
use relay_core::RelayError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    error::{ApiError, ApiResult, AppError},
    middleware::auth::AuthUser,
    routes::SuccessResponse,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/bots", get(list_bots).post(add_bot))
        .route("/api/admin/bots/{bot_id}", delete(remove_bot))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AddBotRequest {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotItem {
    bot_id: String,
    name: String,
    guild_count: usize,
    added_by: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

fn require_admin(state: &AppState, user: &SessionUser, request_id: &RequestId) -> ApiResult<()> {
    if state.settings.admin_user_id.is_none() {
        return Err(
            AppError::Forbidden("Admin not configured".to_string()).with_request_id(&request_id.0)
        );
    }
    if !state.settings.is_admin(&user.id) {
        return Err(AppError::Forbidden("Forbidden".to_string()).with_request_id(&request_id.0));
    }
    Ok(())
}

fn internal(request_id: &RequestId) -> impl Fn(sqlx::Error) -> ApiError + '_ {
    move |err| {
        error!(error = %err, request_id = %request_id.0, "bot store query failed");
        AppError::Internal.with_request_id(&request_id.0)
    }
}

/// Runtime-added bots; the primary bot is not listed.
async fn list_bots(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<Vec<BotItem>>> {
    require_admin(&state, &user, &request_id)?;

    let mut stored: HashMap<String, relay_db::models::Bot> =
        relay_db::queries::bots::list(&state.db)
            .await
            .map_err(internal(&request_id))?
            .into_iter()
            .map(|bot| (bot.bot_id.clone(), bot))
            .collect();

    let items = state
        .registry
        .list()
        .await
        .into_iter()
        .filter(|summary| summary.connection_id != state.primary_bot_id)
        .map(|summary| {
            let record = stored.remove(&summary.connection_id);
            BotItem {
                bot_id: summary.connection_id,
                name: summary.name,
                guild_count: summary.guild_count,
                added_by: record.as_ref().and_then(|bot| bot.added_by.clone()),
                created_at: record.map(|bot| bot.created_at),
            }
        })
        .collect();

    Ok(Json(items))
}

async fn add_bot(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<AddBotRequest>,
) -> ApiResult<Json<BotItem>> {
    require_admin(&state, &user, &request_id)?;

    let token = payload.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Token required".to_string()).with_request_id(&request_id.0));
    }

    let identity = state
        .registry
        .connector()
        .identify(token)
        .await
        .map_err(|err| {
            warn!(error = %err, request_id = %request_id.0, "bot token rejected");
            AppError::BadRequest("Failed to add bot".to_string()).with_request_id(&request_id.0)
        })?;

    let upstream = state
        .registry
        .add(&identity.id, token)
        .await
        .map_err(|err| match err {
            RelayError::DuplicateRegistration(_) => {
                AppError::Conflict("Bot already registered".to_string())
                    .with_request_id(&request_id.0)
            }
            other => AppError::from(other).with_request_id(&request_id.0),
        })?;
    state.relay.attach(&identity.id, &upstream);

    let stored = relay_db::queries::bots::create(
        &state.db,
        &identity.id,
        token,
        Some(&identity.username),
        Some(&user.id),
    )
    .await;
    let record = match stored {
        Ok(record) => record,
        Err(err) => {
            // keep memory and storage in step
            state.relay.detach(&identity.id);
            state.registry.remove(&identity.id).await;
            return Err(internal(&request_id)(err));
        }
    };

    let guild_count = upstream.guilds().await.len();
    info!(bot_id = %identity.id, bot_name = %identity.username, added_by = %user.id, "bot added");

    Ok(Json(BotItem {
        bot_id: record.bot_id,
        name: identity.username,
        guild_count,
        added_by: record.added_by,
        created_at: Some(record.created_at),
    }))
}

async fn remove_bot(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
    Path(bot_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    require_admin(&state, &user, &request_id)?;

    if bot_id == state.primary_bot_id {
        return Err(
            AppError::BadRequest("Cannot remove the primary bot".to_string())
                .with_request_id(&request_id.0),
        );
    }
    if !state.registry.contains(&bot_id).await {
        return Err(AppError::NotFound("Bot not found".to_string()).with_request_id(&request_id.0));
    }

    state.relay.detach(&bot_id);
    state.registry.remove(&bot_id).await;
    relay_db::queries::bots::delete(&state.db, &bot_id)
        .await
        .map_err(internal(&request_id))?;

    info!(%bot_id, removed_by = %user.id, "bot removed");
    Ok(Json(SuccessResponse::ok()))
}
