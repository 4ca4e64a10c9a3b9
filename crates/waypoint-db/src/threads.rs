use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use waypoint_models::thread::{normalize_pair, ThreadStatus};

#[derive(Debug, Clone)]
pub struct ThreadRow {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub initiator_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadRow {
    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::parse(&self.status).unwrap_or(ThreadStatus::Pending)
    }

    pub fn is_participant(&self, user_id: i64) -> bool {
        user_id == self.user_a_id || user_id == self.user_b_id
    }

    pub fn other_participant(&self, user_id: i64) -> i64 {
        if user_id == self.user_a_id {
            self.user_b_id
        } else {
            self.user_a_id
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ThreadRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_a_id: row.try_get("user_a_id")?,
            user_b_id: row.try_get("user_b_id")?,
            initiator_id: row.try_get("initiator_id")?,
            status: row.try_get("status")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

const THREAD_COLUMNS: &str =
    "id, user_a_id, user_b_id, initiator_id, status, created_at, updated_at";

pub async fn get_thread(pool: &DbPool, thread_id: i64) -> Result<Option<ThreadRow>, DbError> {
    let row = sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1"
    ))
    .bind(thread_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Look up the thread between two users, regardless of argument order.
pub async fn find_thread_between(
    pool: &DbPool,
    user_x: i64,
    user_y: i64,
) -> Result<Option<ThreadRow>, DbError> {
    let (a, b) = normalize_pair(user_x, user_y);
    let row = sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE user_a_id = $1 AND user_b_id = $2"
    ))
    .bind(a)
    .bind(b)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn create_thread(
    pool: &DbPool,
    user_x: i64,
    user_y: i64,
    initiator_id: i64,
    status: ThreadStatus,
) -> Result<ThreadRow, DbError> {
    let (a, b) = normalize_pair(user_x, user_y);
    let now = datetime_to_db_text(Utc::now());
    let row = sqlx::query_as::<_, ThreadRow>(&format!(
        "INSERT INTO threads (user_a_id, user_b_id, initiator_id, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {THREAD_COLUMNS}"
    ))
    .bind(a)
    .bind(b)
    .bind(initiator_id)
    .bind(status.as_str())
    .bind(now.clone())
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch the thread for the unordered pair, creating it with the given
/// status when absent.
pub async fn get_or_create_thread(
    pool: &DbPool,
    user_x: i64,
    user_y: i64,
    initiator_id: i64,
    status_if_new: ThreadStatus,
) -> Result<ThreadRow, DbError> {
    if let Some(existing) = find_thread_between(pool, user_x, user_y).await? {
        return Ok(existing);
    }
    create_thread(pool, user_x, user_y, initiator_id, status_if_new).await
}

pub async fn set_thread_status(
    pool: &DbPool,
    thread_id: i64,
    status: ThreadStatus,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE threads SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status.as_str())
        .bind(datetime_to_db_text(Utc::now()))
        .bind(thread_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Bump `updated_at` so the thread sorts to the top of the inbox.
pub async fn touch_thread(pool: &DbPool, thread_id: i64) -> Result<(), DbError> {
    sqlx::query("UPDATE threads SET updated_at = $1 WHERE id = $2")
        .bind(datetime_to_db_text(Utc::now()))
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_threads_for_user(
    pool: &DbPool,
    user_id: i64,
    status: ThreadStatus,
    limit: i64,
    offset: i64,
) -> Result<Vec<ThreadRow>, DbError> {
    let rows = sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads
         WHERE status = $1 AND (user_a_id = $2 OR user_b_id = $2)
         ORDER BY updated_at DESC
         LIMIT $3 OFFSET $4"
    ))
    .bind(status.as_str())
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Pending requests addressed to `user_id` (threads they did not initiate).
pub async fn list_pending_requests_for_user(
    pool: &DbPool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<ThreadRow>, DbError> {
    let rows = sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads
         WHERE status = 'pending'
           AND (user_a_id = $1 OR user_b_id = $1)
           AND initiator_id <> $1
         ORDER BY updated_at DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use crate::users;

    async fn two_users(pool: &DbPool) -> (i64, i64) {
        let a = users::create_user(pool, "ada").await.unwrap();
        let b = users::create_user(pool, "ben").await.unwrap();
        (a.id, b.id)
    }

    #[tokio::test]
    async fn thread_pair_is_canonical() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;

        let thread = create_thread(&pool, b, a, b, ThreadStatus::Pending)
            .await
            .unwrap();
        assert_eq!((thread.user_a_id, thread.user_b_id), (a, b));
        assert_eq!(thread.initiator_id, b);

        let found = find_thread_between(&pool, a, b).await.unwrap().unwrap();
        assert_eq!(found.id, thread.id);
        let found = find_thread_between(&pool, b, a).await.unwrap().unwrap();
        assert_eq!(found.id, thread.id);
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_thread() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;

        let first = get_or_create_thread(&pool, a, b, a, ThreadStatus::Pending)
            .await
            .unwrap();
        let second = get_or_create_thread(&pool, b, a, b, ThreadStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        // status of the existing thread is untouched
        assert_eq!(second.status(), ThreadStatus::Pending);
    }

    #[tokio::test]
    async fn status_transition_and_touch() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;
        let thread = create_thread(&pool, a, b, a, ThreadStatus::Pending)
            .await
            .unwrap();

        set_thread_status(&pool, thread.id, ThreadStatus::Accepted)
            .await
            .unwrap();
        let reloaded = get_thread(&pool, thread.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status(), ThreadStatus::Accepted);
        assert!(reloaded.updated_at >= thread.updated_at);
    }

    #[tokio::test]
    async fn pending_requests_exclude_initiator() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;
        create_thread(&pool, a, b, a, ThreadStatus::Pending)
            .await
            .unwrap();

        let for_recipient = list_pending_requests_for_user(&pool, b, 20, 0).await.unwrap();
        assert_eq!(for_recipient.len(), 1);
        let for_initiator = list_pending_requests_for_user(&pool, a, 20, 0).await.unwrap();
        assert!(for_initiator.is_empty());
    }
}
