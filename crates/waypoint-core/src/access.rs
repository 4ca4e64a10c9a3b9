//! Connection-time access control.
//!
//! Both checks run once, before the socket is registered; membership is not
//! re-validated mid-session.

use thiserror::Error;

use waypoint_db::{checkins, places, threads, DbError, DbPool};
use waypoint_models::close::CloseCode;
use waypoint_models::thread::ThreadStatus;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl AccessError {
    /// The close code a websocket handler sends for this denial.
    pub fn close_code(&self) -> CloseCode {
        match self {
            AccessError::Forbidden => CloseCode::Forbidden,
            AccessError::NotFound => CloseCode::NotFound,
            AccessError::Database(_) => CloseCode::Forbidden,
        }
    }
}

/// A DM socket requires an existing, accepted thread the user belongs to.
/// Pending and rejected threads are reachable only through the request API.
pub async fn authorize_dm_connect(
    pool: &DbPool,
    user_id: i64,
    thread_id: i64,
) -> Result<threads::ThreadRow, AccessError> {
    let thread = threads::get_thread(pool, thread_id)
        .await?
        .ok_or(AccessError::NotFound)?;
    if !thread.is_participant(user_id) {
        return Err(AccessError::Forbidden);
    }
    if thread.status() != ThreadStatus::Accepted {
        return Err(AccessError::Forbidden);
    }
    Ok(thread)
}

/// A place socket requires the place to exist and the user to hold a
/// non-expired check-in inside the rolling window.
pub async fn authorize_place_connect(
    pool: &DbPool,
    user_id: i64,
    place_id: i64,
    window_hours: u32,
) -> Result<(), AccessError> {
    if places::get_place(pool, place_id).await?.is_none() {
        return Err(AccessError::NotFound);
    }
    if !checkins::has_recent_checkin(pool, user_id, place_id, window_hours).await? {
        return Err(AccessError::Forbidden);
    }
    Ok(())
}
