//! Sliding-window rate limiting for abuse-prone write paths.
//!
//! Each (action, user) pair keeps the timestamps of its recent hits; a hit
//! is admitted only while fewer than `limit` timestamps fall inside the
//! window. Rejections report how long until the oldest hit ages out.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedAction {
    DmRequestCreate,
    DmMessageCreate,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

pub struct RateLimiter {
    dm_request: RateLimitConfig,
    dm_message: RateLimitConfig,
    windows: Mutex<HashMap<(RateLimitedAction, i64), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(dm_request: RateLimitConfig, dm_message: RateLimitConfig) -> Self {
        Self {
            dm_request,
            dm_message,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn config_for(&self, action: RateLimitedAction) -> RateLimitConfig {
        match action {
            RateLimitedAction::DmRequestCreate => self.dm_request,
            RateLimitedAction::DmMessageCreate => self.dm_message,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(RateLimitedAction, i64), VecDeque<Instant>>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a hit for the user, or reject it if the window is full.
    pub fn check(
        &self,
        action: RateLimitedAction,
        user_id: i64,
    ) -> Result<(), RateLimitExceeded> {
        let config = self.config_for(action);
        let now = Instant::now();
        let mut windows = self.lock();
        let hits = windows.entry((action, user_id)).or_default();

        while hits
            .front()
            .is_some_and(|&hit| now.duration_since(hit) >= config.window)
        {
            hits.pop_front();
        }

        if hits.len() >= config.limit {
            // front is the oldest in-window hit; admission reopens when it
            // ages out
            let retry_after = hits
                .front()
                .map(|&oldest| (oldest + config.window).saturating_duration_since(now))
                .unwrap_or_default();
            return Err(RateLimitExceeded { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drop window state for users with no in-window hits. Called
    /// periodically so idle users do not accumulate entries.
    pub fn retain_active(&self) {
        let now = Instant::now();
        let mut windows = self.lock();
        windows.retain(|(action, _), hits| {
            let window = match action {
                RateLimitedAction::DmRequestCreate => self.dm_request.window,
                RateLimitedAction::DmMessageCreate => self.dm_message.window,
            };
            while hits
                .front()
                .is_some_and(|&hit| now.duration_since(hit) >= window)
            {
                hits.pop_front();
            }
            !hits.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            RateLimitConfig {
                limit: 5,
                window: Duration::from_secs(60),
            },
            RateLimitConfig {
                limit: 30,
                window: Duration::from_secs(60),
            },
        )
    }
}
