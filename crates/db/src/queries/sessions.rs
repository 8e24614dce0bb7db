use crate::models::Session;
use sqlx::PgPool;

pub async fn get_by_user_id(pool: &PgPool, user_id: &str) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT user_id, username, avatar, global_name, age_verified, created_at, updated_at
        FROM sessions
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Returns false when no session exists for the user.
pub async fn set_age_verified(
    pool: &PgPool,
    user_id: &str,
    verified: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET age_verified = $1,
            updated_at = now()
        WHERE user_id = $2
        "#,
    )
    .bind(verified)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete(pool: &PgPool, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
