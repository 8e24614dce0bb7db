use std::time::Duration;

use crate::delivery::{QUEUE_IDLE_GRACE, SEND_SPACING};
use crate::member_cache::{MEMBER_CACHE_TTL, MEMBER_FAIL_TTL};
use crate::protocol::MAX_UPLOAD_BYTES;
use crate::rate_limit::{SEND_LIMIT, SEND_WINDOW};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub api_bind: String,
    pub discord_token: String,
    pub discord_client_id: Option<String>,
    pub session_secret: String,
    pub admin_user_id: Option<String>,
    pub send_spacing: Duration,
    pub queue_idle_grace: Duration,
    pub member_ttl: Duration,
    pub member_fail_ttl: Duration,
    pub send_limit: u32,
    pub send_window: Duration,
    pub reply_timeout: Duration,
    pub max_upload_bytes: usize,
    pub api_rate_limit: u32,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = var("RELAY_DATABASE_URL")
            .or_else(|| var("DATABASE_URL"))
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let api_bind = var("RELAY_API_BIND").unwrap_or_else(|| "0.0.0.0:3001".to_string());
        let discord_token = var("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;
        let session_secret = var("SESSION_SECRET")
            .or_else(|| var("JWT_SECRET"))
            .ok_or(ConfigError::Missing("SESSION_SECRET"))?;

        Ok(Self {
            database_url,
            api_bind,
            discord_token,
            discord_client_id: var("DISCORD_CLIENT_ID"),
            session_secret,
            admin_user_id: var("ADMIN_USER_ID"),
            send_spacing: Duration::from_millis(parsed(
                "RELAY_SEND_SPACING_MS",
                SEND_SPACING.as_millis() as u64,
            )?),
            queue_idle_grace: Duration::from_millis(parsed(
                "RELAY_QUEUE_IDLE_MS",
                QUEUE_IDLE_GRACE.as_millis() as u64,
            )?),
            member_ttl: Duration::from_secs(parsed(
                "RELAY_MEMBER_TTL_SECS",
                MEMBER_CACHE_TTL.as_secs(),
            )?),
            member_fail_ttl: Duration::from_secs(parsed(
                "RELAY_MEMBER_FAIL_TTL_SECS",
                MEMBER_FAIL_TTL.as_secs(),
            )?),
            send_limit: parsed("RELAY_SEND_LIMIT", SEND_LIMIT)?,
            send_window: Duration::from_secs(parsed("RELAY_SEND_WINDOW_SECS", SEND_WINDOW.as_secs())?),
            reply_timeout: Duration::from_millis(parsed("RELAY_REPLY_TIMEOUT_MS", 2000u64)?),
            max_upload_bytes: parsed("RELAY_MAX_UPLOAD_BYTES", MAX_UPLOAD_BYTES)?,
            api_rate_limit: parsed("RELAY_API_RATE_LIMIT", 60)?,
        })
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_id.as_deref() == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_default_and_invalid() {
        assert_eq!(parsed("RELAY_TEST_UNSET_VALUE", 42u32).unwrap(), 42);

        std::env::set_var("RELAY_TEST_BAD_VALUE", "not-a-number");
        let err = parsed("RELAY_TEST_BAD_VALUE", 1u32).unwrap_err();
        assert!(err.to_string().contains("RELAY_TEST_BAD_VALUE"));
        std::env::remove_var("RELAY_TEST_BAD_VALUE");
    }

    #[test]
    fn test_is_admin() {
        let settings = Settings {
            database_url: String::new(),
            api_bind: String::new(),
            discord_token: String::new(),
            discord_client_id: None,
            session_secret: String::new(),
            admin_user_id: Some("42".to_string()),
            send_spacing: SEND_SPACING,
            queue_idle_grace: QUEUE_IDLE_GRACE,
            member_ttl: MEMBER_CACHE_TTL,
            member_fail_ttl: MEMBER_FAIL_TTL,
            send_limit: SEND_LIMIT,
            send_window: SEND_WINDOW,
            reply_timeout: Duration::from_secs(2),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            api_rate_limit: 60,
        };
        assert!(settings.is_admin("42"));
        assert!(!settings.is_admin("43"));
    }
}
