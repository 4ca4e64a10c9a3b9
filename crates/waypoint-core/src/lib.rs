pub mod access;
pub mod auth;
pub mod error;
pub mod notify;
pub mod place_chat;
pub mod presence;
pub mod rate_limit;
pub mod registry;

use std::sync::Arc;

use waypoint_db::DbPool;

use crate::notify::Notifier;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;

/// Maximum length of a place-chat message, in characters. Oversize text is
/// rejected with an in-band error, not a close.
pub const MAX_PLACE_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    /// Rolling window (hours) within which a check-in grants place-chat
    /// membership.
    pub place_chat_window_hours: u32,
    /// Soft expiry applied to a `typing` frame.
    pub typing_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_seconds: 3600,
            place_chat_window_hours: 12,
            typing_ttl_secs: 5,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub notifier: Notifier,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        db: DbPool,
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        config: AppConfig,
    ) -> Self {
        let notifier = Notifier::new(Arc::clone(&registry));
        Self {
            db,
            registry,
            limiter,
            notifier,
            config,
        }
    }
}
