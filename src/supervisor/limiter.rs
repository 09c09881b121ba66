//! Restart rate limiting.
//!
//! [`RestartLimiter`] bounds how often one service may be restarted so a
//! crash loop cannot burn the host. The window is anchored at the most
//! recent restart: once more than `window` has passed since then, the count
//! starts over on the next evaluation. Nothing resets eagerly on a timer.

use crate::config::SupervisorSettings;
use crate::supervisor::record::ServiceRecord;
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartLimiter {
    /// Maximum restarts allowed inside one window
    max_restarts: u32,
    /// Window length
    window: Duration,
}

impl Default for RestartLimiter {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(3600),
        }
    }
}

impl RestartLimiter {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
        }
    }

    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self::new(settings.max_restarts, settings.restart_window())
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn window_elapsed(&self, record: &ServiceRecord, now: Instant) -> bool {
        match record.last_restart_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.window,
        }
    }

    /// Decides whether `record` may restart at `now`.
    ///
    /// Resets the count when the window has elapsed. On approval the count is
    /// incremented and the restart time recorded; a denial leaves the counters
    /// untouched.
    pub fn may_restart(&self, record: &mut ServiceRecord, now: Instant) -> bool {
        if self.window_elapsed(record, now) {
            record.restart_count = 0;
        }

        if record.restart_count >= self.max_restarts {
            return false;
        }

        record.restart_count += 1;
        record.last_restart_at = Some(now);
        record.last_restart_wall = Some(Utc::now());
        true
    }

    /// What [`may_restart`](Self::may_restart) would answer, without
    /// touching the record.
    pub fn is_eligible(&self, record: &ServiceRecord, now: Instant) -> bool {
        self.window_elapsed(record, now) || record.restart_count < self.max_restarts
    }
}
