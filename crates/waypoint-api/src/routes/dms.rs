use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use waypoint_core::rate_limit::RateLimitedAction;
use waypoint_core::AppState;
use waypoint_db::threads::ThreadRow;
use waypoint_db::{message_likes, messages, participant_states, threads, users};
use waypoint_models::channel::ChannelId;
use waypoint_models::frame::OutboundFrame;
use waypoint_models::thread::ThreadStatus;

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub recipient_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequestBody {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    pub text: String,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct FlagBody {
    pub value: bool,
}

fn thread_json(thread: &ThreadRow) -> Value {
    json!({
        "id": thread.id,
        "user_a_id": thread.user_a_id,
        "user_b_id": thread.user_b_id,
        "initiator_id": thread.initiator_id,
        "status": thread.status,
        "created_at": thread.created_at,
        "updated_at": thread.updated_at,
    })
}

async fn participant_thread(
    state: &AppState,
    thread_id: i64,
    user_id: i64,
) -> Result<ThreadRow, ApiError> {
    let thread = threads::get_thread(&state.db, thread_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !thread.is_participant(user_id) {
        return Err(ApiError::Forbidden("not a participant"));
    }
    Ok(thread)
}

/// Deliver a freshly stored message: broadcast into the thread channel and,
/// when the peer has no socket open on it, push a notification to their
/// other connections.
async fn fan_out_message(state: &AppState, thread_id: i64, peer: i64, row: &messages::MessageRow) {
    let channel = ChannelId::Dm(thread_id);
    state.notifier.channel_message(channel, row).await;
    if !state.registry.is_user_in_channel(channel, peer) {
        state.notifier.dm_notification(peer, thread_id, row).await;
    }
}

pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.recipient_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "cannot start a conversation with yourself".into(),
        ));
    }
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("message text required".into()));
    }
    state
        .limiter
        .check(RateLimitedAction::DmRequestCreate, auth.user_id)?;

    if users::get_user(&state.db, body.recipient_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    if participant_states::has_block_between(&state.db, auth.user_id, body.recipient_id).await? {
        return Err(ApiError::Forbidden("blocked"));
    }

    let thread = match threads::find_thread_between(&state.db, auth.user_id, body.recipient_id)
        .await?
    {
        None => {
            threads::create_thread(
                &state.db,
                auth.user_id,
                body.recipient_id,
                auth.user_id,
                ThreadStatus::Pending,
            )
            .await?
        }
        Some(existing) => match existing.status() {
            ThreadStatus::Accepted => existing,
            ThreadStatus::Blocked => return Err(ApiError::Forbidden("blocked")),
            ThreadStatus::Pending if existing.initiator_id == auth.user_id => {
                return Err(ApiError::Conflict("request already pending".into()));
            }
            ThreadStatus::Rejected if existing.initiator_id == auth.user_id => {
                return Err(ApiError::Forbidden("request was declined"));
            }
            // the recipient writing back is an implicit accept
            ThreadStatus::Pending | ThreadStatus::Rejected => {
                threads::set_thread_status(&state.db, existing.id, ThreadStatus::Accepted).await?;
                threads::get_thread(&state.db, existing.id)
                    .await?
                    .ok_or(ApiError::NotFound)?
            }
        },
    };

    let row = messages::create_message(
        &state.db,
        ChannelId::Dm(thread.id),
        auth.user_id,
        text,
        None,
        &[],
    )
    .await?;
    threads::touch_thread(&state.db, thread.id).await?;
    fan_out_message(&state, thread.id, thread.other_participant(auth.user_id), &row).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "thread": thread_json(&thread),
            "message": row.to_payload(),
        })),
    ))
}

pub async fn decide_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
    Json(body): Json<DecideRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let decision = match body.action.as_str() {
        "accept" => ThreadStatus::Accepted,
        "reject" => ThreadStatus::Rejected,
        _ => return Err(ApiError::BadRequest("action must be accept or reject".into())),
    };

    let thread = participant_thread(&state, thread_id, auth.user_id).await?;
    if thread.initiator_id == auth.user_id {
        return Err(ApiError::Forbidden("only the recipient can decide"));
    }
    if thread.status() != ThreadStatus::Pending {
        return Err(ApiError::Conflict("request already decided".into()));
    }

    threads::set_thread_status(&state.db, thread_id, decision).await?;
    let thread = threads::get_thread(&state.db, thread_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(thread_json(&thread)))
}

pub async fn inbox(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let threads = threads::list_threads_for_user(
        &state.db,
        auth.user_id,
        ThreadStatus::Accepted,
        page.limit,
        page.offset,
    )
    .await?;
    let requests =
        threads::list_pending_requests_for_user(&state.db, auth.user_id, page.limit, page.offset)
            .await?;
    Ok(Json(json!({
        "threads": threads.iter().map(thread_json).collect::<Vec<_>>(),
        "requests": requests.iter().map(thread_json).collect::<Vec<_>>(),
    })))
}

pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
    Json(body): Json<CreateMessageBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let thread = participant_thread(&state, thread_id, auth.user_id).await?;
    if thread.status() != ThreadStatus::Accepted {
        return Err(ApiError::Forbidden("thread is not accepted"));
    }
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("message text required".into()));
    }
    state
        .limiter
        .check(RateLimitedAction::DmMessageCreate, auth.user_id)?;

    let peer = thread.other_participant(auth.user_id);
    if participant_states::has_block_between(&state.db, auth.user_id, peer).await? {
        return Err(ApiError::Forbidden("blocked"));
    }

    let channel = ChannelId::Dm(thread_id);
    if let Some(reply_to_id) = body.reply_to_id {
        let target = messages::get_message(&state.db, reply_to_id)
            .await?
            .filter(|m| m.channel() == Some(channel) && !m.is_deleted());
        if target.is_none() {
            return Err(ApiError::BadRequest("invalid reply target".into()));
        }
    }

    let row = messages::create_message(
        &state.db,
        channel,
        auth.user_id,
        text,
        body.reply_to_id,
        &body.media_urls,
    )
    .await?;
    threads::touch_thread(&state.db, thread_id).await?;
    fan_out_message(&state, thread_id, peer, &row).await;

    Ok((StatusCode::CREATED, Json(json!(row.to_payload()))))
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    let rows = messages::list_channel_messages(
        &state.db,
        ChannelId::Dm(thread_id),
        page.limit,
        page.offset,
    )
    .await?;
    let payloads: Vec<_> = rows.iter().map(messages::MessageRow::to_payload).collect();
    Ok(Json(json!(payloads)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, message_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    let channel = ChannelId::Dm(thread_id);
    let row = messages::get_message(&state.db, message_id)
        .await?
        .filter(|m| m.channel() == Some(channel))
        .ok_or(ApiError::NotFound)?;
    if row.sender_id != auth.user_id {
        return Err(ApiError::Forbidden("only the sender can delete a message"));
    }

    messages::soft_delete_message(&state.db, message_id).await?;
    if let Some(deleted) = messages::get_message(&state.db, message_id).await? {
        state.notifier.channel_message(channel, &deleted).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle the caller's heart on a message. Hearts are the persisted half of
/// reactions; live relay on the socket stays ephemeral.
pub async fn heart_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, message_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    messages::get_message(&state.db, message_id)
        .await?
        .filter(|m| m.channel() == Some(ChannelId::Dm(thread_id)) && !m.is_deleted())
        .ok_or(ApiError::NotFound)?;

    let heart = message_likes::toggle_heart(&state.db, message_id, auth.user_id).await?;
    Ok(Json(json!({
        "liked": heart.liked,
        "heart_count": heart.heart_count,
    })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let unread = messages::unread_dm_count_for_user(&state.db, auth.user_id).await?;
    Ok(Json(json!({ "unread": unread })))
}

pub async fn thread_unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    let unread = messages::unread_dm_count_in_thread(&state.db, thread_id, auth.user_id).await?;
    Ok(Json(json!({ "unread": unread })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    let last_read_at = participant_states::mark_read(&state.db, thread_id, auth.user_id).await?;
    state
        .registry
        .broadcast(
            ChannelId::Dm(thread_id),
            Some(auth.user_id),
            &OutboundFrame::read_receipt(auth.user_id, last_read_at),
        )
        .await;
    Ok(Json(json!({ "last_read_at": last_read_at })))
}

pub async fn set_muted(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
    Json(body): Json<FlagBody>,
) -> Result<StatusCode, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    participant_states::set_muted(&state.db, thread_id, auth.user_id, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_blocked(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<i64>,
    Json(body): Json<FlagBody>,
) -> Result<StatusCode, ApiError> {
    participant_thread(&state, thread_id, auth.user_id).await?;
    participant_states::set_blocked(&state.db, thread_id, auth.user_id, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}
