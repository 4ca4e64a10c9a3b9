use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use waypoint_core::{presence, AppState};
use waypoint_models::availability::{AvailabilityMode, AvailabilityStatus};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub mode: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Switch between automatic presence (derived from live connections) and a
/// pinned manual status.
pub async fn put_availability(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AvailabilityBody>,
) -> Result<Json<Value>, ApiError> {
    let mode = AvailabilityMode::parse(&body.mode)
        .ok_or_else(|| ApiError::BadRequest("mode must be auto or manual".into()))?;

    let availability = match mode {
        AvailabilityMode::Manual => {
            let status = body
                .status
                .as_deref()
                .and_then(AvailabilityStatus::parse)
                .ok_or_else(|| {
                    ApiError::BadRequest("manual mode requires status online or offline".into())
                })?;
            presence::set_manual(&state.db, auth.user_id, status).await?
        }
        AvailabilityMode::Auto => {
            presence::set_auto(&state.db, &state.registry, auth.user_id).await?
        }
    };

    state
        .notifier
        .presence_change(
            auth.user_id,
            availability.status == AvailabilityStatus::Online,
        )
        .await;

    Ok(Json(json!({
        "status": availability.status.as_str(),
        "mode": availability.mode.as_str(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_core::rate_limit::RateLimiter;
    use waypoint_core::registry::{ConnectionRegistry, RegistryConfig};
    use waypoint_core::AppConfig;
    use waypoint_db::{create_pool, run_migrations, users, DatabaseEngine};

    async fn test_state() -> AppState {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool, DatabaseEngine::Sqlite).await.unwrap();
        AppState::new(
            pool,
            ConnectionRegistry::new(RegistryConfig::default()),
            Arc::new(RateLimiter::default()),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn manual_then_back_to_auto() {
        let state = test_state().await;
        let user = users::create_user(&state.db, "ana").await.unwrap();

        let Json(body) = put_availability(
            State(state.clone()),
            AuthUser { user_id: user.id },
            Json(AvailabilityBody {
                mode: "manual".into(),
                status: Some("online".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["status"], "online");
        assert_eq!(body["mode"], "manual");

        // no live connections, so auto derives offline
        let Json(body) = put_availability(
            State(state.clone()),
            AuthUser { user_id: user.id },
            Json(AvailabilityBody {
                mode: "auto".into(),
                status: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["status"], "offline");
        assert_eq!(body["mode"], "auto");

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn manual_mode_requires_a_status() {
        let state = test_state().await;
        let user = users::create_user(&state.db, "ana").await.unwrap();

        let err = put_availability(
            State(state.clone()),
            AuthUser { user_id: user.id },
            Json(AvailabilityBody {
                mode: "manual".into(),
                status: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        state.registry.shutdown().await;
    }
}
