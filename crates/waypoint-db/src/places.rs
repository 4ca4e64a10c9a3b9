use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct PlaceRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for PlaceRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create_place(pool: &DbPool, name: &str) -> Result<PlaceRow, DbError> {
    let row = sqlx::query_as::<_, PlaceRow>(
        "INSERT INTO places (name, created_at) VALUES ($1, $2)
         RETURNING id, name, created_at",
    )
    .bind(name)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_place(pool: &DbPool, place_id: i64) -> Result<Option<PlaceRow>, DbError> {
    let row = sqlx::query_as::<_, PlaceRow>(
        "SELECT id, name, created_at FROM places WHERE id = $1",
    )
    .bind(place_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
