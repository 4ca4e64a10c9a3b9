use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use waypoint_core::rate_limit::RateLimitExceeded;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited { retry_after_ms: u64 },
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::RateLimited { retry_after_ms } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "rate limited",
                        "retry_after_ms": retry_after_ms,
                    })),
                )
                    .into_response();
            }
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RateLimitExceeded> for ApiError {
    fn from(e: RateLimitExceeded) -> Self {
        ApiError::RateLimited {
            retry_after_ms: e.retry_after.as_millis().max(1) as u64,
        }
    }
}

impl From<waypoint_core::error::CoreError> for ApiError {
    fn from(e: waypoint_core::error::CoreError) -> Self {
        use waypoint_core::error::CoreError;
        match e {
            CoreError::NotFound => ApiError::NotFound,
            CoreError::Forbidden(why) => ApiError::Forbidden(why),
            CoreError::BadRequest(msg) => ApiError::BadRequest(msg),
            CoreError::Database(_) => ApiError::Internal(anyhow::anyhow!("database error")),
            CoreError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<waypoint_db::DbError> for ApiError {
    fn from(e: waypoint_db::DbError) -> Self {
        match e {
            waypoint_db::DbError::NotFound => ApiError::NotFound,
            waypoint_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}
