use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use waypoint_models::channel::{ChannelId, ChannelKind};
use waypoint_models::frame::MessagePayload;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub channel_kind: String,
    pub channel_id: i64,
    pub sender_id: i64,
    pub text: Option<String>,
    pub reply_to_id: Option<i64>,
    pub media_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    pub fn channel(&self) -> Option<ChannelId> {
        match self.channel_kind.as_str() {
            "dm" => Some(ChannelId::Dm(self.channel_id)),
            "place" => Some(ChannelId::Place(self.channel_id)),
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Wire shape; soft-deleted messages keep id and position but no text.
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            sender_id: self.sender_id,
            text: if self.is_deleted() {
                None
            } else {
                self.text.clone()
            },
            created_at: self.created_at,
            reply_to_id: self.reply_to_id,
            media_urls: if self.is_deleted() {
                Vec::new()
            } else {
                self.media_urls.clone()
            },
            deleted: self.is_deleted(),
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let deleted_at_raw: Option<String> = row.try_get("deleted_at")?;
        let media_urls_raw: String = row.try_get("media_urls")?;
        let media_urls: Vec<String> = serde_json::from_str(&media_urls_raw)
            .map_err(|e| sqlx::Error::Protocol(format!("invalid media_urls json: {e}")))?;
        Ok(Self {
            id: row.try_get("id")?,
            channel_kind: row.try_get("channel_kind")?,
            channel_id: row.try_get("channel_id")?,
            sender_id: row.try_get("sender_id")?,
            text: row.try_get("text")?,
            reply_to_id: row.try_get("reply_to_id")?,
            media_urls,
            created_at: datetime_from_db_text(&created_at_raw)?,
            deleted_at: deleted_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, channel_kind, channel_id, sender_id, text, reply_to_id, media_urls, created_at, deleted_at";

fn channel_parts(channel: ChannelId) -> (&'static str, i64) {
    (
        match channel.kind() {
            ChannelKind::Dm => "dm",
            ChannelKind::Place => "place",
        },
        channel.raw(),
    )
}

pub async fn create_message(
    pool: &DbPool,
    channel: ChannelId,
    sender_id: i64,
    text: &str,
    reply_to_id: Option<i64>,
    media_urls: &[String],
) -> Result<MessageRow, DbError> {
    let (kind, channel_id) = channel_parts(channel);
    let media_json = serde_json::to_string(media_urls)
        .map_err(|e| DbError::Sqlx(sqlx::Error::Protocol(format!("media_urls encode: {e}"))))?;
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "INSERT INTO messages (channel_kind, channel_id, sender_id, text, reply_to_id, media_urls, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(kind)
    .bind(channel_id)
    .bind(sender_id)
    .bind(text)
    .bind(reply_to_id)
    .bind(media_json)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_message(pool: &DbPool, message_id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Soft delete: the row stays for ordering and audit, text is retained in
/// storage but never served once `deleted_at` is set.
pub async fn soft_delete_message(pool: &DbPool, message_id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE messages SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(datetime_to_db_text(Utc::now()))
    .bind(message_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn list_channel_messages(
    pool: &DbPool,
    channel: ChannelId,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let (kind, channel_id) = channel_parts(channel);
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE channel_kind = $1 AND channel_id = $2
         ORDER BY created_at ASC, id ASC
         LIMIT $3 OFFSET $4"
    ))
    .bind(kind)
    .bind(channel_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Messages from others in accepted threads, newer than the reader's read
/// cursor. Threads with no participant state count everything.
pub async fn unread_dm_count_for_user(pool: &DbPool, user_id: i64) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(m.id) FROM messages m
         JOIN threads t ON m.channel_kind = 'dm' AND m.channel_id = t.id
         LEFT JOIN participant_states ps
             ON ps.thread_id = t.id AND ps.user_id = $1
         WHERE t.status = 'accepted'
           AND (t.user_a_id = $1 OR t.user_b_id = $1)
           AND m.sender_id != $1
           AND m.deleted_at IS NULL
           AND (ps.last_read_at IS NULL OR m.created_at > ps.last_read_at)",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn unread_dm_count_in_thread(
    pool: &DbPool,
    thread_id: i64,
    user_id: i64,
) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(m.id) FROM messages m
         LEFT JOIN participant_states ps
             ON ps.thread_id = $1 AND ps.user_id = $2
         WHERE m.channel_kind = 'dm' AND m.channel_id = $1
           AND m.sender_id != $2
           AND m.deleted_at IS NULL
           AND (ps.last_read_at IS NULL OR m.created_at > ps.last_read_at)",
    )
    .bind(thread_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
