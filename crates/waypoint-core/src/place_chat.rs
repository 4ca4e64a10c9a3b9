//! Place-chat specific flows, chiefly the private reply that lifts a public
//! exchange into a DM thread.

use waypoint_db::{checkins, messages, participant_states, places, threads, users, DbPool};
use waypoint_models::channel::ChannelId;
use waypoint_models::thread::ThreadStatus;

use crate::error::CoreError;

/// Characters of quoted context carried into a private reply.
const CONTEXT_SNIPPET_CHARS: usize = 200;

/// Start (or continue) a DM from inside a place chat. The target must still
/// be a member of the room and neither side may have blocked the other. The
/// resulting thread skips the request handshake: both users are already
/// talking in the same room.
pub async fn create_private_reply(
    pool: &DbPool,
    window_hours: u32,
    place_id: i64,
    sender_id: i64,
    target_user_id: i64,
    text: &str,
    context: Option<&str>,
) -> Result<(threads::ThreadRow, messages::MessageRow), CoreError> {
    if target_user_id == sender_id {
        return Err(CoreError::BadRequest(
            "cannot reply privately to yourself".into(),
        ));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::BadRequest("message text is blank".into()));
    }
    if users::get_user(pool, target_user_id).await?.is_none() {
        return Err(CoreError::NotFound);
    }
    if !checkins::has_recent_checkin(pool, target_user_id, place_id, window_hours).await? {
        return Err(CoreError::Forbidden("target is not present in this room"));
    }
    if participant_states::has_block_between(pool, sender_id, target_user_id).await? {
        return Err(CoreError::Forbidden("blocked"));
    }

    let thread = threads::get_or_create_thread(
        pool,
        sender_id,
        target_user_id,
        sender_id,
        ThreadStatus::Accepted,
    )
    .await?;

    let place_name = places::get_place(pool, place_id).await?.map(|p| p.name);
    let body = compose_reply_body(place_name.as_deref(), context, text);

    let message =
        messages::create_message(pool, ChannelId::Dm(thread.id), sender_id, &body, None, &[])
            .await?;
    threads::touch_thread(pool, thread.id).await?;
    Ok((thread, message))
}

/// Attribution header, quoted context capped at a fixed character count,
/// blank line, then the reply itself.
fn compose_reply_body(place_name: Option<&str>, context: Option<&str>, text: &str) -> String {
    let mut lines = Vec::new();
    match place_name {
        Some(name) => lines.push(format!("[Private reply from place chat: {name}]")),
        None => lines.push("[Private reply from place chat]".to_string()),
    }
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        let mut snippet: String = context.chars().take(CONTEXT_SNIPPET_CHARS).collect();
        if context.chars().count() > CONTEXT_SNIPPET_CHARS {
            snippet.push_str("...");
        }
        lines.push(format!("> {snippet}"));
    }
    lines.push(String::new());
    lines.push(text.to_string());
    lines.join("\n")
}
