mod handler;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use waypoint_core::AppState;

use crate::handler::SocketTarget;

pub fn chat_router() -> Router<AppState> {
    Router::new()
        .route("/ws/dms/{thread_id}", get(dm_upgrade))
        .route("/ws/places/{place_id}", get(place_upgrade))
}

/// Browsers cannot set headers on a websocket handshake, so the token rides
/// in the query string. A missing token still upgrades; the handler closes
/// with an auth code the client can read.
#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn dm_upgrade(
    ws: WebSocketUpgrade,
    Path(thread_id): Path<i64>,
    Query(query): Query<TokenQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handler::handle_connection(socket, state, SocketTarget::Dm(thread_id), query.token)
    })
}

async fn place_upgrade(
    ws: WebSocketUpgrade,
    Path(place_id): Path<i64>,
    Query(query): Query<TokenQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handler::handle_connection(socket, state, SocketTarget::Place(place_id), query.token)
    })
}
