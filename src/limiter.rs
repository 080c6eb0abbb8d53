//! Fixed-window rate limiting
//!
//! Applied before an event enters the queue. Rejected events are dropped with
//! a diagnostic, never queued and never persisted; a rate-limit rejection is
//! not a delivery failure. The window resets lazily on the first admission
//! attempt past its end, so no background timer is involved.

/// Length of the admission window.
const WINDOW_MILLIS: i64 = 60_000;

#[derive(Debug)]
pub struct RateLimiter {
    limit_per_window: u32,
    admitted_this_window: u32,
    window_reset_at_millis: i64,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32) -> Self {
        Self {
            limit_per_window,
            admitted_this_window: 0,
            window_reset_at_millis: 0,
        }
    }

    /// Admit or reject an event at the current wall-clock time.
    pub fn admit(&mut self) -> bool {
        self.admit_at(chrono::Utc::now().timestamp_millis())
    }

    /// Admit or reject at an explicit time.
    pub fn admit_at(&mut self, now_millis: i64) -> bool {
        if now_millis >= self.window_reset_at_millis {
            self.window_reset_at_millis = now_millis + WINDOW_MILLIS;
            self.admitted_this_window = 0;
        }
        if self.admitted_this_window >= self.limit_per_window {
            return false;
        }
        self.admitted_this_window += 1;
        true
    }
}
