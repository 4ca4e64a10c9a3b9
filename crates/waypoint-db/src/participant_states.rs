use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

/// Per-(thread, user) flags and cursors, created lazily on first touch.
#[derive(Debug, Clone)]
pub struct ParticipantStateRow {
    pub thread_id: i64,
    pub user_id: i64,
    pub last_read_at: Option<DateTime<Utc>>,
    pub typing_until: Option<DateTime<Utc>>,
    pub muted: bool,
    pub blocked: bool,
    pub pinned: bool,
    pub archived: bool,
}

impl ParticipantStateRow {
    /// `typing_until` is a soft expiry; there is no explicit stop event.
    pub fn typing_active(&self, now: DateTime<Utc>) -> bool {
        self.typing_until.is_some_and(|until| until > now)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ParticipantStateRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let last_read_raw: Option<String> = row.try_get("last_read_at")?;
        let typing_raw: Option<String> = row.try_get("typing_until")?;
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            user_id: row.try_get("user_id")?,
            last_read_at: last_read_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            typing_until: typing_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            muted: bool_from_any_row(row, "muted")?,
            blocked: bool_from_any_row(row, "blocked")?,
            pinned: bool_from_any_row(row, "pinned")?,
            archived: bool_from_any_row(row, "archived")?,
        })
    }
}

const STATE_COLUMNS: &str =
    "thread_id, user_id, last_read_at, typing_until, muted, blocked, pinned, archived";

pub async fn get_state(
    pool: &DbPool,
    thread_id: i64,
    user_id: i64,
) -> Result<Option<ParticipantStateRow>, DbError> {
    let row = sqlx::query_as::<_, ParticipantStateRow>(&format!(
        "SELECT {STATE_COLUMNS} FROM participant_states
         WHERE thread_id = $1 AND user_id = $2"
    ))
    .bind(thread_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_or_create_state(
    pool: &DbPool,
    thread_id: i64,
    user_id: i64,
) -> Result<ParticipantStateRow, DbError> {
    if let Some(existing) = get_state(pool, thread_id, user_id).await? {
        return Ok(existing);
    }
    let row = sqlx::query_as::<_, ParticipantStateRow>(&format!(
        "INSERT INTO participant_states (thread_id, user_id)
         VALUES ($1, $2)
         RETURNING {STATE_COLUMNS}"
    ))
    .bind(thread_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Set `last_read_at = now`, returning the stored timestamp.
pub async fn mark_read(
    pool: &DbPool,
    thread_id: i64,
    user_id: i64,
) -> Result<DateTime<Utc>, DbError> {
    get_or_create_state(pool, thread_id, user_id).await?;
    let now = Utc::now();
    sqlx::query(
        "UPDATE participant_states SET last_read_at = $1
         WHERE thread_id = $2 AND user_id = $3",
    )
    .bind(datetime_to_db_text(now))
    .bind(thread_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(now)
}

pub async fn set_typing_until(
    pool: &DbPool,
    thread_id: i64,
    user_id: i64,
    typing_until: Option<DateTime<Utc>>,
) -> Result<(), DbError> {
    get_or_create_state(pool, thread_id, user_id).await?;
    sqlx::query(
        "UPDATE participant_states SET typing_until = $1
         WHERE thread_id = $2 AND user_id = $3",
    )
    .bind(typing_until.map(datetime_to_db_text))
    .bind(thread_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

macro_rules! flag_setter {
    ($name:ident, $column:literal) => {
        pub async fn $name(
            pool: &DbPool,
            thread_id: i64,
            user_id: i64,
            value: bool,
        ) -> Result<(), DbError> {
            get_or_create_state(pool, thread_id, user_id).await?;
            sqlx::query(concat!(
                "UPDATE participant_states SET ",
                $column,
                " = $1 WHERE thread_id = $2 AND user_id = $3"
            ))
            .bind(value)
            .bind(thread_id)
            .bind(user_id)
            .execute(pool)
            .await?;
            Ok(())
        }
    };
}

flag_setter!(set_muted, "muted");
flag_setter!(set_blocked, "blocked");
flag_setter!(set_pinned, "pinned");
flag_setter!(set_archived, "archived");

/// True if either user has blocked the other in their shared thread.
pub async fn has_block_between(
    pool: &DbPool,
    user_x: i64,
    user_y: i64,
) -> Result<bool, DbError> {
    if user_x == user_y {
        return Ok(false);
    }
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM participant_states ps
         INNER JOIN threads t ON t.id = ps.thread_id
         WHERE ps.blocked AND (
             (t.user_a_id = $1 AND t.user_b_id = $2)
          OR (t.user_a_id = $2 AND t.user_b_id = $1)
         )",
    )
    .bind(user_x)
    .bind(user_y)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// True if `blocker_id` has blocked `target_id` in their shared thread.
pub async fn has_user_blocked(
    pool: &DbPool,
    blocker_id: i64,
    target_id: i64,
) -> Result<bool, DbError> {
    if blocker_id == target_id {
        return Ok(false);
    }
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM participant_states ps
         INNER JOIN threads t ON t.id = ps.thread_id
         WHERE ps.blocked AND ps.user_id = $1 AND (
             (t.user_a_id = $1 AND t.user_b_id = $2)
          OR (t.user_a_id = $2 AND t.user_b_id = $1)
         )",
    )
    .bind(blocker_id)
    .bind(target_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
