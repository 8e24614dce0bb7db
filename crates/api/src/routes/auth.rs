use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use relay_core::auth::SESSION_COOKIE;
use serde::Serialize;
use tracing::{error, info};

use crate::{
    error::{ApiResult, AppError},
    middleware::auth::AuthUser,
    routes::SuccessResponse,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/age-verify", post(age_verify))
        .route("/api/auth/logout", post(logout))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    id: String,
    username: String,
    global_name: Option<String>,
    display_name: String,
    avatar: Option<String>,
    avatar_url: String,
    age_verified: bool,
    is_admin: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgeVerifyResponse {
    success: bool,
    age_verified: bool,
}

fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<MeResponse> {
    Json(MeResponse {
        is_admin: state.settings.is_admin(&user.id),
        display_name: user.display_name().to_string(),
        avatar_url: user.avatar_url(),
        id: user.id,
        username: user.username,
        global_name: user.global_name,
        avatar: user.avatar,
        age_verified: user.age_verified,
    })
}

async fn age_verify(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<AgeVerifyResponse>> {
    let updated = relay_db::queries::sessions::set_age_verified(&state.db, &user.id, true)
        .await
        .map_err(|err| {
            error!(error = %err, request_id = %request_id.0, "age verification update failed");
            AppError::Internal.with_request_id(&request_id.0)
        })?;
    if !updated {
        return Err(
            AppError::NotFound("Session not found".to_string()).with_request_id(&request_id.0)
        );
    }

    info!(user_id = %user.id, "user age verified");
    Ok(Json(AgeVerifyResponse {
        success: true,
        age_verified: true,
    }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<impl IntoResponse> {
    relay_db::queries::sessions::delete(&state.db, &user.id)
        .await
        .map_err(|err| {
            error!(error = %err, request_id = %request_id.0, "session delete failed");
            AppError::Internal.with_request_id(&request_id.0)
        })?;

    Ok((
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(SuccessResponse::ok()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_cookie_expires_session() {
        let cookie = clear_session_cookie();
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
