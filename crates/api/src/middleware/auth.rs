use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use relay_core::auth::{token_from_cookie, verify_session};
use relay_core::types::SessionUser;
use tracing::{debug, error};

use crate::{
    error::{ApiError, AppError},
    state::{AppState, RequestId},
};

/// The browser user behind the request, loaded from the session store.
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionUser);

pub(crate) fn request_id_of(req: &Request<Body>) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(token_from_cookie)
        .map(str::to_string)
}

/// Resolves a signed token to the stored session, or a message suitable for
/// the client.
pub(crate) async fn resolve_session(state: &AppState, token: &str) -> Result<SessionUser, AppError> {
    let claims = verify_session(&state.settings.session_secret, token).map_err(|err| {
        debug!(error = %err, "session token rejected");
        AppError::Unauthorized
    })?;

    let session = relay_db::queries::sessions::get_by_user_id(&state.db, &claims.user_id)
        .await
        .map_err(|err| {
            error!(error = %err, "session lookup failed");
            AppError::Internal
        })?
        .ok_or(AppError::Unauthorized)?;

    Ok(session.into())
}

pub async fn session_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request_id_of(&req);
    let token = session_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized.with_request_id(&request_id))?;

    let user = resolve_session(&state, &token)
        .await
        .map_err(|err| err.with_request_id(&request_id))?;

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}
