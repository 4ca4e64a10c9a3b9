use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct CheckinRow {
    pub id: i64,
    pub user_id: i64,
    pub place_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for CheckinRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let expires_at_raw: Option<String> = row.try_get("expires_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            place_id: row.try_get("place_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            expires_at: expires_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
        })
    }
}

pub async fn create_checkin(
    pool: &DbPool,
    user_id: i64,
    place_id: i64,
    expires_at: Option<DateTime<Utc>>,
) -> Result<CheckinRow, DbError> {
    let row = sqlx::query_as::<_, CheckinRow>(
        "INSERT INTO checkins (user_id, place_id, created_at, expires_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id, user_id, place_id, created_at, expires_at",
    )
    .bind(user_id)
    .bind(place_id)
    .bind(datetime_to_db_text(Utc::now()))
    .bind(expires_at.map(datetime_to_db_text))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Place-chat membership check: a non-expired check-in at the place created
/// within the rolling window. Evaluated at connect time only.
pub async fn has_recent_checkin(
    pool: &DbPool,
    user_id: i64,
    place_id: i64,
    window_hours: u32,
) -> Result<bool, DbError> {
    let now = Utc::now();
    let cutoff = now - Duration::hours(i64::from(window_hours));
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checkins
         WHERE user_id = $1 AND place_id = $2
           AND created_at >= $3
           AND (expires_at IS NULL OR expires_at > $4)",
    )
    .bind(user_id)
    .bind(place_id)
    .bind(datetime_to_db_text(cutoff))
    .bind(datetime_to_db_text(now))
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
