use std::time::Duration;

use axum::http::Request;
use tower_governor::{errors::GovernorError, key_extractor::KeyExtractor};

use crate::middleware::auth::AuthUser;

/// Keys the API limiter on the authenticated user. Must run behind
/// `session_auth`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionUserKeyExtractor;

impl KeyExtractor for SessionUserKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        req.extensions()
            .get::<AuthUser>()
            .map(|user| user.0.id.clone())
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

/// Spacing between replenished requests for a per-minute budget.
pub fn replenish_period(per_minute: u32) -> Duration {
    Duration::from_secs(60) / per_minute.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use relay_core::types::SessionUser;

    fn user(id: &str) -> AuthUser {
        AuthUser(SessionUser {
            id: id.to_string(),
            username: "alice".to_string(),
            global_name: None,
            avatar: None,
            age_verified: false,
        })
    }

    #[test]
    fn test_key_is_user_id() {
        let mut req = Request::builder().uri("/api/guilds").body(Body::empty()).unwrap();
        req.extensions_mut().insert(user("u1"));
        assert_eq!(SessionUserKeyExtractor.extract(&req).unwrap(), "u1");
    }

    #[test]
    fn test_unauthenticated_request_has_no_key() {
        let req = Request::builder().uri("/api/guilds").body(Body::empty()).unwrap();
        assert!(matches!(
            SessionUserKeyExtractor.extract(&req),
            Err(GovernorError::UnableToExtractKey)
        ));
    }

    #[test]
    fn test_replenish_period() {
        assert_eq!(replenish_period(60), Duration::from_secs(1));
        assert_eq!(replenish_period(120), Duration::from_millis(500));
        assert_eq!(replenish_period(0), Duration::from_secs(60));
    }
}
