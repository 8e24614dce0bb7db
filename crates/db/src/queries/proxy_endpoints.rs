//! Channel → webhook mapping used to post as relay users.

use crate::models::ProxyEndpoint;
use sqlx::PgPool;

pub async fn get_by_channel(
    pool: &PgPool,
    channel_id: &str,
) -> Result<Option<ProxyEndpoint>, sqlx::Error> {
    sqlx::query_as::<_, ProxyEndpoint>(
        r#"
        SELECT channel_id, endpoint_id, endpoint_secret, created_at
        FROM proxy_endpoints
        WHERE channel_id = $1
        "#,
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await
}

/// Inserts or replaces the channel's endpoint. At most one row per channel.
pub async fn upsert(
    pool: &PgPool,
    channel_id: &str,
    endpoint_id: &str,
    endpoint_secret: &str,
) -> Result<ProxyEndpoint, sqlx::Error> {
    sqlx::query_as::<_, ProxyEndpoint>(
        r#"
        INSERT INTO proxy_endpoints (channel_id, endpoint_id, endpoint_secret)
        VALUES ($1, $2, $3)
        ON CONFLICT (channel_id) DO UPDATE
        SET endpoint_id = EXCLUDED.endpoint_id,
            endpoint_secret = EXCLUDED.endpoint_secret,
            created_at = now()
        RETURNING channel_id, endpoint_id, endpoint_secret, created_at
        "#,
    )
    .bind(channel_id)
    .bind(endpoint_id)
    .bind(endpoint_secret)
    .fetch_one(pool)
    .await
}
