use crate::{datetime_to_db_text, DbError, DbPool};
use chrono::Utc;

/// Result of a heart toggle: the caller's state after the toggle and the
/// message's new total.
#[derive(Debug, Clone, Copy)]
pub struct HeartState {
    pub liked: bool,
    pub heart_count: i64,
}

/// Flip the caller's heart on a message. A second toggle removes it.
pub async fn toggle_heart(
    pool: &DbPool,
    message_id: i64,
    user_id: i64,
) -> Result<HeartState, DbError> {
    let removed = sqlx::query("DELETE FROM message_likes WHERE message_id = $1 AND user_id = $2")
        .bind(message_id)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    let liked = removed == 0;
    if liked {
        sqlx::query(
            "INSERT INTO message_likes (message_id, user_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(datetime_to_db_text(Utc::now()))
        .execute(pool)
        .await?;
    }

    let heart_count = heart_count(pool, message_id).await?;
    Ok(HeartState { liked, heart_count })
}

pub async fn heart_count(pool: &DbPool, message_id: i64) -> Result<i64, DbError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(id) FROM message_likes WHERE message_id = $1")
            .bind(message_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
