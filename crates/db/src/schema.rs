use sqlx::PgPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        user_id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        avatar TEXT,
        global_name TEXT,
        age_verified BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proxy_endpoints (
        channel_id TEXT PRIMARY KEY,
        endpoint_id TEXT NOT NULL,
        endpoint_secret TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bots (
        bot_id TEXT PRIMARY KEY,
        bot_token TEXT NOT NULL,
        bot_name TEXT,
        added_by TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Creates the relay tables if they don't exist. Safe to run on every start.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(tables = SCHEMA.len(), "schema ready");
    Ok(())
}
