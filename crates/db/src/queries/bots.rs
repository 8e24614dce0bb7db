use crate::models::Bot;
use sqlx::PgPool;

pub async fn list(pool: &PgPool) -> Result<Vec<Bot>, sqlx::Error> {
    sqlx::query_as::<_, Bot>(
        r#"
        SELECT bot_id, bot_token, bot_name, added_by, created_at
        FROM bots
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn create(
    pool: &PgPool,
    bot_id: &str,
    bot_token: &str,
    bot_name: Option<&str>,
    added_by: Option<&str>,
) -> Result<Bot, sqlx::Error> {
    sqlx::query_as::<_, Bot>(
        r#"
        INSERT INTO bots (bot_id, bot_token, bot_name, added_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (bot_id) DO UPDATE
        SET bot_token = EXCLUDED.bot_token,
            bot_name = EXCLUDED.bot_name,
            added_by = EXCLUDED.added_by
        RETURNING bot_id, bot_token, bot_name, added_by, created_at
        "#,
    )
    .bind(bot_id)
    .bind(bot_token)
    .bind(bot_name)
    .bind(added_by)
    .fetch_one(pool)
    .await
}

/// Returns false when no such bot was stored.
pub async fn delete(pool: &PgPool, bot_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM bots WHERE bot_id = $1")
        .bind(bot_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
