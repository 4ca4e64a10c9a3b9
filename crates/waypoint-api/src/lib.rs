pub mod error;
pub mod middleware;
pub mod routes;

use axum::{
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use waypoint_core::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/api/v1/dms/requests", post(routes::dms::create_request))
        .route(
            "/api/v1/dms/requests/{thread_id}",
            put(routes::dms::decide_request),
        )
        .route("/api/v1/dms/inbox", get(routes::dms::inbox))
        .route("/api/v1/dms/unread-count", get(routes::dms::unread_count))
        .route(
            "/api/v1/dms/threads/{thread_id}/unread-count",
            get(routes::dms::thread_unread_count),
        )
        .route(
            "/api/v1/dms/threads/{thread_id}/messages",
            post(routes::dms::create_message).get(routes::dms::list_messages),
        )
        .route(
            "/api/v1/dms/threads/{thread_id}/messages/{message_id}",
            axum::routing::delete(routes::dms::delete_message),
        )
        .route(
            "/api/v1/dms/threads/{thread_id}/messages/{message_id}/heart",
            post(routes::dms::heart_message),
        )
        .route(
            "/api/v1/dms/threads/{thread_id}/mark-read",
            post(routes::dms::mark_read),
        )
        .route("/api/v1/dms/threads/{thread_id}/mute", put(routes::dms::set_muted))
        .route("/api/v1/dms/threads/{thread_id}/block", put(routes::dms::set_blocked))
        .route(
            "/api/v1/users/me/availability",
            put(routes::users::put_availability),
        )
        .layer(build_cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    // Clients are mobile apps and local dev frontends, so any origin is fine.
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "waypoint" })),
    )
}
