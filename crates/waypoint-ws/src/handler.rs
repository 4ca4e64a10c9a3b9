use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Duration;

use waypoint_core::registry::{connection_channel, ConnectionHandle, SocketCommand};
use waypoint_core::{access, auth, place_chat, presence, AppState, MAX_PLACE_MESSAGE_CHARS};
use waypoint_db::{messages, participant_states, threads};
use waypoint_models::channel::ChannelId;
use waypoint_core::error::CoreError;
use waypoint_models::close::CloseCode;
use waypoint_models::frame::{ErrorCode, InboundFrame, OutboundFrame};

const OUTBOUND_BUFFER: usize = 64;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum SocketTarget {
    Dm(i64),
    Place(i64),
}

/// Everything a frame handler needs to know about the connection it serves.
pub(crate) struct ConnContext {
    pub channel: ChannelId,
    pub user_id: i64,
    /// The other thread participant; `None` on place sockets.
    pub dm_peer: Option<i64>,
    pub handle: ConnectionHandle,
}

pub(crate) async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    target: SocketTarget,
    token: Option<String>,
) {
    let user_id = match token
        .as_deref()
        .map(|t| auth::validate_token(t, &state.config.jwt_secret))
    {
        Some(Ok(claims)) => claims.sub,
        _ => {
            close_socket(socket, CloseCode::Unauthenticated).await;
            return;
        }
    };

    let (channel, dm_peer) = match target {
        SocketTarget::Dm(thread_id) => {
            match access::authorize_dm_connect(&state.db, user_id, thread_id).await {
                Ok(thread) => (
                    ChannelId::Dm(thread_id),
                    Some(thread.other_participant(user_id)),
                ),
                Err(err) => {
                    tracing::debug!(user_id, thread_id, "dm connect denied: {err}");
                    close_socket(socket, err.close_code()).await;
                    return;
                }
            }
        }
        SocketTarget::Place(place_id) => {
            match access::authorize_place_connect(
                &state.db,
                user_id,
                place_id,
                state.config.place_chat_window_hours,
            )
            .await
            {
                Ok(()) => (ChannelId::Place(place_id), None),
                Err(err) => {
                    tracing::debug!(user_id, place_id, "place connect denied: {err}");
                    close_socket(socket, err.close_code()).await;
                    return;
                }
            }
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let (handle, mut commands) = connection_channel(OUTBOUND_BUFFER);
    let ctx = ConnContext {
        channel,
        user_id,
        dm_peer,
        handle: handle.clone(),
    };
    state.registry.connect(channel, user_id, handle);
    tracing::info!(%channel, user_id, "socket connected");

    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                SocketCommand::Frame(payload) => {
                    if sender
                        .send(Message::Text(payload.as_str().to_owned().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                SocketCommand::Close(code) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: code.code(),
                            reason: code.reason().to_string().into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    match presence::mark_connected(&state.db, user_id).await {
        Ok(true) => state.notifier.presence_change(user_id, true).await,
        Ok(false) => {}
        Err(err) => tracing::warn!(user_id, "presence update failed: {err}"),
    }

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => dispatch_frame(&state, &ctx, frame).await,
                Err(err) => {
                    tracing::debug!(user_id, "malformed frame: {err}");
                    send_error(&ctx, ErrorCode::UnknownType, "malformed frame").await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(user_id, "socket receive error: {err}");
                break;
            }
        }
    }

    teardown_connection(&state, &ctx).await;

    drop(ctx);
    let _ = writer.await;
}

/// Drop the registry entry and, when this was the user's last connection,
/// announce them offline to the channel. The availability write stays
/// mode-gated inside `mark_disconnected`; the presence frame does not.
pub(crate) async fn teardown_connection(state: &AppState, ctx: &ConnContext) {
    let removed = state
        .registry
        .disconnect(ctx.channel, ctx.user_id, ctx.handle.id());
    if removed {
        tracing::info!(channel = %ctx.channel, user_id = ctx.user_id, "socket disconnected");
    }
    if !state.registry.is_user_online(ctx.user_id) {
        state
            .registry
            .broadcast(
                ctx.channel,
                Some(ctx.user_id),
                &OutboundFrame::presence(ctx.user_id, false),
            )
            .await;
    }
    if let Err(err) = presence::mark_disconnected(&state.db, &state.registry, ctx.user_id).await {
        tracing::warn!(user_id = ctx.user_id, "presence update failed: {err}");
    }
}

async fn close_socket(mut socket: WebSocket, code: CloseCode) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: code.reason().to_string().into(),
        })))
        .await;
}

async fn send_error(ctx: &ConnContext, code: ErrorCode, message: &str) {
    if !ctx
        .handle
        .send(&OutboundFrame::error(code, message), REPLY_TIMEOUT)
        .await
    {
        tracing::debug!(user_id = ctx.user_id, "error frame not delivered");
    }
}

pub(crate) async fn dispatch_frame(state: &AppState, ctx: &ConnContext, frame: InboundFrame) {
    match frame {
        InboundFrame::Ping => {
            state
                .registry
                .update_ping(ctx.channel, ctx.user_id, ctx.handle.id());
            let _ = ctx.handle.send(&OutboundFrame::pong(), REPLY_TIMEOUT).await;
        }
        InboundFrame::Typing { typing } => handle_typing(state, ctx, typing).await,
        InboundFrame::Message {
            text,
            reply_to_id,
            media_urls,
        } => handle_message(state, ctx, &text, reply_to_id, &media_urls).await,
        InboundFrame::MarkRead => match ctx.channel {
            ChannelId::Dm(thread_id) => handle_mark_read(state, ctx, thread_id).await,
            ChannelId::Place(_) => {
                send_error(ctx, ErrorCode::NotSupported, "mark_read is not available here").await;
            }
        },
        InboundFrame::Reaction {
            message_id,
            reaction,
        } => handle_reaction(state, ctx, message_id, &reaction).await,
        InboundFrame::ReplyPrivate {
            target_user_id,
            text,
            context,
        } => match ctx.channel {
            ChannelId::Place(place_id) => {
                handle_reply_private(state, ctx, place_id, target_user_id, &text, context.as_deref())
                    .await;
            }
            ChannelId::Dm(_) => {
                send_error(ctx, ErrorCode::NotSupported, "reply_private is not available here")
                    .await;
            }
        },
        InboundFrame::Unknown => {
            send_error(ctx, ErrorCode::UnknownType, "unrecognized frame type").await;
        }
    }
}

async fn handle_typing(state: &AppState, ctx: &ConnContext, typing: bool) {
    if let ChannelId::Dm(thread_id) = ctx.channel {
        let until = typing
            .then(|| chrono::Utc::now() + chrono::Duration::seconds(state.config.typing_ttl_secs as i64));
        if let Err(err) =
            participant_states::set_typing_until(&state.db, thread_id, ctx.user_id, until).await
        {
            tracing::warn!(user_id = ctx.user_id, thread_id, "typing update failed: {err}");
            return;
        }
    }
    state
        .registry
        .broadcast(
            ctx.channel,
            Some(ctx.user_id),
            &OutboundFrame::typing(ctx.user_id, typing),
        )
        .await;
}

async fn handle_message(
    state: &AppState,
    ctx: &ConnContext,
    text: &str,
    reply_to_id: Option<i64>,
    media_urls: &[String],
) {
    let text = text.trim();
    if text.is_empty() {
        send_error(ctx, ErrorCode::BlankText, "message text required").await;
        return;
    }

    match ctx.channel {
        ChannelId::Dm(thread_id) => {
            let Some(peer) = ctx.dm_peer else { return };
            match participant_states::has_block_between(&state.db, ctx.user_id, peer).await {
                Ok(true) => {
                    send_error(ctx, ErrorCode::Blocked, "this conversation is blocked").await;
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(user_id = ctx.user_id, "block lookup failed: {err}");
                    send_error(ctx, ErrorCode::Storage, "message not sent").await;
                    return;
                }
            }
            if !reply_target_valid(state, ctx, reply_to_id).await {
                return;
            }
            let row = match messages::create_message(
                &state.db,
                ctx.channel,
                ctx.user_id,
                text,
                reply_to_id,
                media_urls,
            )
            .await
            {
                Ok(row) => row,
                Err(err) => {
                    tracing::error!(user_id = ctx.user_id, "message write failed: {err}");
                    send_error(ctx, ErrorCode::Storage, "message not sent").await;
                    return;
                }
            };
            if let Err(err) = threads::touch_thread(&state.db, thread_id).await {
                tracing::warn!(thread_id, "thread touch failed: {err}");
            }
            state
                .registry
                .broadcast(ctx.channel, None, &OutboundFrame::message(row.to_payload()))
                .await;
            if !state.registry.is_user_in_channel(ctx.channel, peer) {
                state.notifier.dm_notification(peer, thread_id, &row).await;
            }
        }
        ChannelId::Place(_) => {
            if text.chars().count() > MAX_PLACE_MESSAGE_CHARS {
                send_error(ctx, ErrorCode::TextTooLong, "message exceeds the length limit").await;
                return;
            }
            if !reply_target_valid(state, ctx, reply_to_id).await {
                return;
            }
            let row = match messages::create_message(
                &state.db,
                ctx.channel,
                ctx.user_id,
                text,
                reply_to_id,
                media_urls,
            )
            .await
            {
                Ok(row) => row,
                Err(err) => {
                    tracing::error!(user_id = ctx.user_id, "message write failed: {err}");
                    send_error(ctx, ErrorCode::Storage, "message not sent").await;
                    return;
                }
            };
            state
                .registry
                .broadcast(ctx.channel, None, &OutboundFrame::message(row.to_payload()))
                .await;
        }
    }
}

/// A reply target must exist in this channel and still be visible.
async fn reply_target_valid(state: &AppState, ctx: &ConnContext, reply_to_id: Option<i64>) -> bool {
    let Some(reply_to_id) = reply_to_id else {
        return true;
    };
    match messages::get_message(&state.db, reply_to_id).await {
        Ok(Some(target)) if target.channel() == Some(ctx.channel) && !target.is_deleted() => true,
        Ok(_) => {
            send_error(ctx, ErrorCode::InvalidReplyTarget, "no such message here").await;
            false
        }
        Err(err) => {
            tracing::warn!(user_id = ctx.user_id, "reply target lookup failed: {err}");
            send_error(ctx, ErrorCode::Storage, "message not sent").await;
            false
        }
    }
}

async fn handle_mark_read(state: &AppState, ctx: &ConnContext, thread_id: i64) {
    match participant_states::mark_read(&state.db, thread_id, ctx.user_id).await {
        Ok(last_read_at) => {
            state
                .registry
                .broadcast(
                    ctx.channel,
                    Some(ctx.user_id),
                    &OutboundFrame::read_receipt(ctx.user_id, last_read_at),
                )
                .await;
        }
        Err(err) => {
            tracing::warn!(user_id = ctx.user_id, thread_id, "mark_read failed: {err}");
            send_error(ctx, ErrorCode::Storage, "read state not saved").await;
        }
    }
}

/// Reactions are pure fan-out on the socket path; nothing is read or
/// written. Receivers drop reactions for messages they do not hold.
async fn handle_reaction(state: &AppState, ctx: &ConnContext, message_id: i64, reaction: &str) {
    state
        .registry
        .broadcast(
            ctx.channel,
            Some(ctx.user_id),
            &OutboundFrame::reaction(message_id, ctx.user_id, reaction),
        )
        .await;
}

async fn handle_reply_private(
    state: &AppState,
    ctx: &ConnContext,
    place_id: i64,
    target_user_id: i64,
    text: &str,
    context: Option<&str>,
) {
    if target_user_id == ctx.user_id {
        send_error(ctx, ErrorCode::InvalidReplyTarget, "cannot reply to yourself").await;
        return;
    }

    match place_chat::create_private_reply(
        &state.db,
        state.config.place_chat_window_hours,
        place_id,
        ctx.user_id,
        target_user_id,
        text,
        context,
    )
    .await
    {
        Ok((thread, message)) => {
            let _ = ctx
                .handle
                .send(
                    &OutboundFrame::reply_private_sent(thread.id, message.to_payload()),
                    REPLY_TIMEOUT,
                )
                .await;
            state
                .notifier
                .dm_notification(target_user_id, thread.id, &message)
                .await;
        }
        Err(err) => {
            let (code, message) = reply_private_error(&err);
            send_error(ctx, code, message).await;
        }
    }
}

fn reply_private_error(err: &CoreError) -> (ErrorCode, &'static str) {
    match err {
        CoreError::BadRequest(_) => (ErrorCode::BlankText, "message text required"),
        CoreError::NotFound => (ErrorCode::InvalidReplyTarget, "no such user"),
        CoreError::Forbidden("blocked") => (ErrorCode::Blocked, "this conversation is blocked"),
        CoreError::Forbidden(_) => {
            (ErrorCode::TargetNotPresent, "that user is no longer here")
        }
        CoreError::Database(_) | CoreError::Internal(_) => {
            (ErrorCode::Storage, "message not sent")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use waypoint_core::rate_limit::{RateLimitConfig, RateLimiter};
    use waypoint_core::registry::{ConnectionRegistry, RegistryConfig};
    use waypoint_core::AppConfig;
    use waypoint_db::{checkins, create_pool, places, run_migrations, users, DatabaseEngine};
    use waypoint_models::thread::ThreadStatus;

    async fn test_state() -> AppState {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool, DatabaseEngine::Sqlite).await.unwrap();
        AppState::new(
            pool,
            ConnectionRegistry::new(RegistryConfig::default()),
            Arc::new(RateLimiter::default()),
            AppConfig {
                jwt_secret: "test-secret".into(),
                ..AppConfig::default()
            },
        )
    }

    fn join(
        state: &AppState,
        channel: ChannelId,
        user_id: i64,
        dm_peer: Option<i64>,
    ) -> (ConnContext, mpsc::Receiver<SocketCommand>) {
        let (handle, rx) = connection_channel(OUTBOUND_BUFFER);
        state.registry.connect(channel, user_id, handle.clone());
        (
            ConnContext {
                channel,
                user_id,
                dm_peer,
                handle,
            },
            rx,
        )
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<SocketCommand>) -> OutboundFrame {
        match rx.recv().await.expect("command") {
            SocketCommand::Frame(json) => serde_json::from_str(&json).expect("frame json"),
            SocketCommand::Close(code) => panic!("unexpected close: {code:?}"),
        }
    }

    async fn dm_pair(state: &AppState) -> (i64, i64, i64) {
        let a = users::create_user(&state.db, "ana").await.unwrap();
        let b = users::create_user(&state.db, "bo").await.unwrap();
        let thread =
            threads::create_thread(&state.db, a.id, b.id, a.id, ThreadStatus::Accepted)
                .await
                .unwrap();
        (thread.id, a.id, b.id)
    }

    #[tokio::test]
    async fn dm_message_is_persisted_and_broadcast_to_both_sides() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let (ctx_a, mut rx_a) = join(&state, channel, a, Some(b));
        let (_ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        dispatch_frame(
            &state,
            &ctx_a,
            InboundFrame::Message {
                text: "hey, made it to the cafe".into(),
                reply_to_id: None,
                media_urls: vec![],
            },
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match recv_frame(rx).await {
                OutboundFrame::Message { message, .. } => {
                    assert_eq!(message.sender_id, a);
                    assert_eq!(message.text.as_deref(), Some("hey, made it to the cafe"));
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        let stored = messages::list_channel_messages(&state.db, channel, 50, 0)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn mark_read_sends_a_receipt_to_the_other_side() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let (_ctx_a, mut rx_a) = join(&state, channel, a, Some(b));
        let (ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        dispatch_frame(&state, &ctx_b, InboundFrame::MarkRead).await;

        match recv_frame(&mut rx_a).await {
            OutboundFrame::ReadReceipt { user_id, .. } => assert_eq!(user_id, b),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
        let saved = participant_states::get_state(&state.db, thread_id, b)
            .await
            .unwrap()
            .unwrap();
        assert!(saved.last_read_at.is_some());

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn blocked_dm_message_is_rejected_without_persisting() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        participant_states::set_blocked(&state.db, thread_id, b, true)
            .await
            .unwrap();
        let (ctx_a, mut rx_a) = join(&state, channel, a, Some(b));
        let (_ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        dispatch_frame(
            &state,
            &ctx_a,
            InboundFrame::Message {
                text: "hello?".into(),
                reply_to_id: None,
                media_urls: vec![],
            },
        )
        .await;

        match recv_frame(&mut rx_a).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::Blocked),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
        let stored = messages::list_channel_messages(&state.db, channel, 50, 0)
            .await
            .unwrap();
        assert!(stored.is_empty());

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn typing_broadcasts_to_the_peer_and_records_a_soft_expiry() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let (ctx_a, _rx_a) = join(&state, channel, a, Some(b));
        let (_ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        dispatch_frame(&state, &ctx_a, InboundFrame::Typing { typing: true }).await;

        match recv_frame(&mut rx_b).await {
            OutboundFrame::Typing { user_id, typing, .. } => {
                assert_eq!(user_id, a);
                assert!(typing);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        let saved = participant_states::get_state(&state.db, thread_id, a)
            .await
            .unwrap()
            .unwrap();
        assert!(saved.typing_active(chrono::Utc::now()));

        dispatch_frame(&state, &ctx_a, InboundFrame::Typing { typing: false }).await;
        let saved = participant_states::get_state(&state.db, thread_id, a)
            .await
            .unwrap()
            .unwrap();
        assert!(!saved.typing_active(chrono::Utc::now()));

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn place_messages_reject_blank_and_oversize_text() {
        let state = test_state().await;
        let user = users::create_user(&state.db, "ana").await.unwrap();
        let place = places::create_place(&state.db, "Cafe Norte").await.unwrap();
        let channel = ChannelId::Place(place.id);
        let (ctx, mut rx) = join(&state, channel, user.id, None);

        dispatch_frame(
            &state,
            &ctx,
            InboundFrame::Message {
                text: "   ".into(),
                reply_to_id: None,
                media_urls: vec![],
            },
        )
        .await;
        match recv_frame(&mut rx).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::BlankText),
            other => panic!("unexpected frame: {other:?}"),
        }

        dispatch_frame(
            &state,
            &ctx,
            InboundFrame::Message {
                text: "x".repeat(MAX_PLACE_MESSAGE_CHARS + 1),
                reply_to_id: None,
                media_urls: vec![],
            },
        )
        .await;
        match recv_frame(&mut rx).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::TextTooLong),
            other => panic!("unexpected frame: {other:?}"),
        }

        let stored = messages::list_channel_messages(&state.db, channel, 50, 0)
            .await
            .unwrap();
        assert!(stored.is_empty());

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn reply_target_must_live_in_the_same_channel() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let elsewhere = messages::create_message(
            &state.db,
            ChannelId::Place(1),
            a,
            "different room",
            None,
            &[],
        )
        .await
        .unwrap();
        let (ctx_a, mut rx_a) = join(&state, channel, a, Some(b));

        dispatch_frame(
            &state,
            &ctx_a,
            InboundFrame::Message {
                text: "re: that".into(),
                reply_to_id: Some(elsewhere.id),
                media_urls: vec![],
            },
        )
        .await;

        match recv_frame(&mut rx_a).await {
            OutboundFrame::Error { code, .. } => {
                assert_eq!(code, ErrorCode::InvalidReplyTarget)
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn frames_foreign_to_the_channel_kind_report_not_supported() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let (dm_ctx, mut dm_rx) = join(&state, ChannelId::Dm(thread_id), a, Some(b));
        let (place_ctx, mut place_rx) = join(&state, ChannelId::Place(1), a, None);

        dispatch_frame(
            &state,
            &dm_ctx,
            InboundFrame::ReplyPrivate {
                target_user_id: b,
                text: "psst".into(),
                context: None,
            },
        )
        .await;
        match recv_frame(&mut dm_rx).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::NotSupported),
            other => panic!("unexpected frame: {other:?}"),
        }

        dispatch_frame(&state, &place_ctx, InboundFrame::MarkRead).await;
        match recv_frame(&mut place_rx).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::NotSupported),
            other => panic!("unexpected frame: {other:?}"),
        }

        dispatch_frame(&state, &dm_ctx, InboundFrame::Unknown).await;
        match recv_frame(&mut dm_rx).await {
            OutboundFrame::Error { code, .. } => assert_eq!(code, ErrorCode::UnknownType),
            other => panic!("unexpected frame: {other:?}"),
        }

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn private_reply_from_a_room_reaches_the_target_and_confirms() {
        let state = test_state().await;
        let a = users::create_user(&state.db, "ana").await.unwrap();
        let b = users::create_user(&state.db, "bo").await.unwrap();
        let place = places::create_place(&state.db, "Cafe Norte").await.unwrap();
        checkins::create_checkin(&state.db, a.id, place.id, None)
            .await
            .unwrap();
        checkins::create_checkin(&state.db, b.id, place.id, None)
            .await
            .unwrap();
        let channel = ChannelId::Place(place.id);
        let (ctx_a, mut rx_a) = join(&state, channel, a.id, None);
        let (_ctx_b, mut rx_b) = join(&state, channel, b.id, None);

        dispatch_frame(
            &state,
            &ctx_a,
            InboundFrame::ReplyPrivate {
                target_user_id: b.id,
                text: "loved your question".into(),
                context: Some("is the back room open?".into()),
            },
        )
        .await;

        let thread_id = match recv_frame(&mut rx_a).await {
            OutboundFrame::ReplyPrivateSent { thread_id, message, .. } => {
                let text = message.text.unwrap();
                assert!(text.starts_with("[Private reply from place chat: Cafe Norte]"));
                assert!(text.contains("> is the back room open?"));
                assert!(text.ends_with("loved your question"));
                thread_id
            }
            other => panic!("unexpected frame: {other:?}"),
        };
        match recv_frame(&mut rx_b).await {
            OutboundFrame::DmNotification { thread_id: notified, .. } => {
                assert_eq!(notified, thread_id)
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let thread = threads::get_thread(&state.db, thread_id).await.unwrap().unwrap();
        assert_eq!(thread.status(), ThreadStatus::Accepted);

        state.registry.shutdown().await;
    }

    // The limiter guards the REST surface only; frames on an already
    // authorized socket are never throttled.
    #[tokio::test]
    async fn socket_frames_bypass_the_rest_rate_limiter() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool, DatabaseEngine::Sqlite).await.unwrap();
        let tight = RateLimitConfig {
            limit: 1,
            window: Duration::from_secs(60),
        };
        let state = AppState::new(
            pool,
            ConnectionRegistry::new(RegistryConfig::default()),
            Arc::new(RateLimiter::new(tight, tight)),
            AppConfig::default(),
        );
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let (ctx_a, mut rx_a) = join(&state, channel, a, Some(b));

        let message = |text: &str| InboundFrame::Message {
            text: text.into(),
            reply_to_id: None,
            media_urls: vec![],
        };
        dispatch_frame(&state, &ctx_a, message("one")).await;
        dispatch_frame(&state, &ctx_a, message("two")).await;
        dispatch_frame(&state, &ctx_a, message("three")).await;

        for _ in 0..3 {
            assert!(matches!(
                recv_frame(&mut rx_a).await,
                OutboundFrame::Message { .. }
            ));
        }
        let stored = messages::list_channel_messages(&state.db, channel, 50, 0)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn last_disconnect_announces_offline_even_in_manual_mode() {
        use waypoint_models::availability::{AvailabilityMode, AvailabilityStatus};

        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        presence::set_manual(&state.db, a, AvailabilityStatus::Online)
            .await
            .unwrap();
        let channel = ChannelId::Dm(thread_id);
        let (ctx_a, _rx_a) = join(&state, channel, a, Some(b));
        let (_ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        teardown_connection(&state, &ctx_a).await;

        match recv_frame(&mut rx_b).await {
            OutboundFrame::Presence { user_id, online, .. } => {
                assert_eq!(user_id, a);
                assert!(!online);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        // the pinned manual status is untouched by connection churn
        let availability = waypoint_db::users::get_availability(&state.db, a)
            .await
            .unwrap();
        assert_eq!(availability.status, AvailabilityStatus::Online);
        assert_eq!(availability.mode, AvailabilityMode::Manual);

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn reactions_fan_out_without_touching_storage() {
        let state = test_state().await;
        let (thread_id, a, b) = dm_pair(&state).await;
        let channel = ChannelId::Dm(thread_id);
        let (ctx_a, mut rx_a) = join(&state, channel, a, Some(b));
        let (_ctx_b, mut rx_b) = join(&state, channel, b, Some(a));

        // no such message row exists; the frame is relayed as-is
        dispatch_frame(
            &state,
            &ctx_a,
            InboundFrame::Reaction {
                message_id: 9999,
                reaction: "❤️".into(),
            },
        )
        .await;

        match recv_frame(&mut rx_b).await {
            OutboundFrame::Reaction {
                message_id,
                user_id,
                reaction,
                ..
            } => {
                assert_eq!(message_id, 9999);
                assert_eq!(user_id, a);
                assert_eq!(reaction, "❤️");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());

        state.registry.shutdown().await;
    }
}
