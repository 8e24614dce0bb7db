use axum::{http::StatusCode, response::IntoResponse, Json};
use relay_core::RelayError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    AgeRestricted,
    NotFound(String),
    Conflict(String),
    RateLimited,
    BadGateway(String),
    Internal,
}

#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub request_id: String,
}

impl AppError {
    pub fn with_request_id(self, request_id: &str) -> ApiError {
        ApiError {
            error: self,
            request_id: request_id.to_string(),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            RelayError::Forbidden(reason) => AppError::Forbidden(reason),
            RelayError::InsufficientPermission(perm) => {
                AppError::Forbidden(format!("Bot is missing {perm}"))
            }
            RelayError::RestrictedContentGate => AppError::AgeRestricted,
            RelayError::Unauthenticated(_) => AppError::Unauthorized,
            RelayError::RateLimited => AppError::RateLimited,
            RelayError::UpstreamUnavailable(detail) => AppError::BadGateway(detail),
            RelayError::DuplicateRegistration(_) => {
                AppError::Conflict("Bot already registered".to_string())
            }
            RelayError::InvalidRequest(detail) => AppError::BadRequest(detail),
            RelayError::Storage(detail) => {
                error!(error = %detail, "storage failure");
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self.error {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Not authenticated".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::AgeRestricted => (
                StatusCode::FORBIDDEN,
                "restricted_content",
                "Age verification required".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests".to_string(),
            ),
            AppError::BadGateway(detail) => {
                warn!(request_id = %self.request_id, error = %detail, "upstream request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_unavailable",
                    "Discord request failed".to_string(),
                )
            }
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Unexpected error".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: code.to_string(),
                    message,
                    request_id: self.request_id,
                },
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
