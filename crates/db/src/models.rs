use chrono::{DateTime, Utc};
use relay_core::endpoint::EndpointRecord;
use relay_core::types::SessionUser;
use serde::Serialize;
use sqlx::FromRow;

/// Browser session written by the login flow.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub global_name: Option<String>,
    pub age_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionUser {
    fn from(row: Session) -> Self {
        SessionUser {
            id: row.user_id,
            username: row.username,
            global_name: row.global_name,
            avatar: row.avatar,
            age_verified: row.age_verified,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ProxyEndpoint {
    pub channel_id: String,
    pub endpoint_id: String,
    pub endpoint_secret: String,
    pub created_at: DateTime<Utc>,
}

impl From<ProxyEndpoint> for EndpointRecord {
    fn from(row: ProxyEndpoint) -> Self {
        EndpointRecord {
            channel_id: row.channel_id,
            endpoint_id: row.endpoint_id,
            endpoint_secret: row.endpoint_secret,
            created_at: row.created_at,
        }
    }
}

/// A bot registered at runtime through the admin API.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Bot {
    pub bot_id: String,
    #[serde(skip)]
    pub bot_token: String,
    pub bot_name: Option<String>,
    pub added_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
