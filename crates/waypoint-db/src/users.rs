use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use waypoint_models::availability::{Availability, AvailabilityMode, AvailabilityStatus};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub availability_status: String,
    pub availability_mode: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn availability(&self) -> Availability {
        Availability {
            status: AvailabilityStatus::parse(&self.availability_status)
                .unwrap_or(AvailabilityStatus::Offline),
            mode: AvailabilityMode::parse(&self.availability_mode)
                .unwrap_or(AvailabilityMode::Auto),
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            availability_status: row.try_get("availability_status")?,
            availability_mode: row.try_get("availability_mode")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create_user(pool: &DbPool, username: &str) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (username, created_at)
         VALUES ($1, $2)
         RETURNING id, username, availability_status, availability_mode, created_at",
    )
    .bind(username)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user(pool: &DbPool, user_id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, availability_status, availability_mode, created_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_availability(pool: &DbPool, user_id: i64) -> Result<Availability, DbError> {
    get_user(pool, user_id)
        .await?
        .map(|u| u.availability())
        .ok_or(DbError::NotFound)
}

pub async fn set_availability(
    pool: &DbPool,
    user_id: i64,
    availability: Availability,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE users SET availability_status = $1, availability_mode = $2 WHERE id = $3",
    )
    .bind(availability.status.as_str())
    .bind(availability.mode.as_str())
    .bind(user_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Update only the status, leaving the mode untouched. Used by the
/// availability projector on connection churn.
pub async fn set_availability_status(
    pool: &DbPool,
    user_id: i64,
    status: AvailabilityStatus,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE users SET availability_status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn new_users_default_to_offline_auto() {
        let pool = test_pool().await;
        let user = create_user(&pool, "mara").await.unwrap();
        let availability = user.availability();
        assert_eq!(availability.status, AvailabilityStatus::Offline);
        assert_eq!(availability.mode, AvailabilityMode::Auto);
    }

    #[tokio::test]
    async fn availability_round_trip() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jules").await.unwrap();
        set_availability(
            &pool,
            user.id,
            Availability {
                status: AvailabilityStatus::Online,
                mode: AvailabilityMode::Manual,
            },
        )
        .await
        .unwrap();
        let availability = get_availability(&pool, user.id).await.unwrap();
        assert_eq!(availability.status, AvailabilityStatus::Online);
        assert_eq!(availability.mode, AvailabilityMode::Manual);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let pool = test_pool().await;
        assert!(matches!(
            get_availability(&pool, 999).await,
            Err(DbError::NotFound)
        ));
    }
}
