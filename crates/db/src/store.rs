use async_trait::async_trait;
use relay_core::endpoint::{EndpointRecord, EndpointStore};
use relay_core::{RelayError, RelayResult};
use sqlx::PgPool;
use tracing::error;

use crate::queries::proxy_endpoints;

/// Postgres-backed endpoint records.
#[derive(Clone)]
pub struct PgEndpointStore {
    pool: PgPool,
}

impl PgEndpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> RelayError {
    error!(error = %err, "proxy endpoint storage failed");
    RelayError::Storage(err.to_string())
}

#[async_trait]
impl EndpointStore for PgEndpointStore {
    async fn get(&self, channel_id: &str) -> RelayResult<Option<EndpointRecord>> {
        let row = proxy_endpoints::get_by_channel(&self.pool, channel_id)
            .await
            .map_err(storage)?;
        Ok(row.map(EndpointRecord::from))
    }

    async fn put(&self, record: &EndpointRecord) -> RelayResult<()> {
        proxy_endpoints::upsert(
            &self.pool,
            &record.channel_id,
            &record.endpoint_id,
            &record.endpoint_secret,
        )
        .await
        .map_err(storage)?;
        Ok(())
    }
}
