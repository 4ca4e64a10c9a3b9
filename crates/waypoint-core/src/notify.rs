//! Best-effort push of events to whoever is connected. Delivery failures
//! are logged and dropped; persistence already happened by the time any of
//! these run.

use std::sync::Arc;

use waypoint_db::messages::MessageRow;
use waypoint_models::channel::ChannelId;
use waypoint_models::frame::OutboundFrame;

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Tell a user about a new DM, wherever they are connected. Used for
    /// messages created outside their open thread socket, such as private
    /// replies and REST sends.
    pub async fn dm_notification(&self, user_id: i64, thread_id: i64, message: &MessageRow) {
        let frame = OutboundFrame::dm_notification(thread_id, message.to_payload());
        let delivered = self.registry.send_to_user(user_id, &frame).await;
        if delivered == 0 {
            tracing::debug!(user_id, thread_id, "dm notification found no connections");
        }
    }

    /// Push a message into its channel.
    pub async fn channel_message(&self, channel: ChannelId, message: &MessageRow) {
        let frame = OutboundFrame::message(message.to_payload());
        self.registry.broadcast(channel, None, &frame).await;
    }

    /// Announce an availability change to every channel the user occupies.
    pub async fn presence_change(&self, user_id: i64, online: bool) {
        let frame = OutboundFrame::presence(user_id, online);
        let channels = self.registry.user_channels(user_id);
        for channel in channels {
            self.registry.broadcast(channel, Some(user_id), &frame).await;
        }
    }
}
