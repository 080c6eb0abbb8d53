//! Retry backlog and backoff
//!
//! Failed events never loop in place. Each one re-enters the flush path once
//! its backoff delay elapses: the backlog holds per-event due times, feeds
//! the worker's wakeup timer through [`RetryBacklog::next_due`], and hands
//! due events back in insertion order so earlier failures are re-attempted
//! first.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::event::QueuedEvent;

/// Divisor for the jitter range; 4 means up to 25% extra delay.
const JITTER_DIVISOR: u64 = 4;

/// Backoff before transmission attempt `retry_count + 1`:
/// `base * 2^(retry_count - 1)`, so the first retry waits `base`, the second
/// `2 * base`, and so on. Saturates instead of overflowing for absurd counts.
pub fn backoff_delay(base: Duration, retry_count: u32, jitter: bool) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(32);
    let millis = (base.as_millis() as u64).saturating_mul(1u64 << exponent);
    let mut delay = Duration::from_millis(millis);
    if jitter {
        let range = millis / JITTER_DIVISOR;
        if range > 0 {
            delay += Duration::from_millis(rand::rng().random_range(0..=range));
        }
    }
    delay
}

#[derive(Debug)]
struct RetryEntry {
    event: QueuedEvent,
    due_at: Instant,
}

/// Events awaiting re-transmission after backoff.
#[derive(Debug, Default)]
pub struct RetryBacklog {
    entries: Vec<RetryEntry>,
}

impl RetryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an event for re-attempt no earlier than `due_at`.
    pub fn schedule(&mut self, event: QueuedEvent, due_at: Instant) {
        self.entries.push(RetryEntry { event, due_at });
    }

    /// Earliest due time across the backlog.
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.due_at).min()
    }

    /// Remove and return every entry due at `now`, preserving insertion order.
    pub fn take_due(&mut self, now: Instant) -> Vec<QueuedEvent> {
        let mut due = Vec::new();
        let mut waiting = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.due_at <= now {
                due.push(entry.event);
            } else {
                waiting.push(entry);
            }
        }
        self.entries = waiting;
        due
    }

    /// Empty the backlog regardless of due times (shutdown persistence).
    pub fn drain(&mut self) -> Vec<QueuedEvent> {
        self.entries.drain(..).map(|e| e.event).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRecord, Level};

    fn queued(message: &str) -> QueuedEvent {
        QueuedEvent::new(
            EventRecord::builder()
                .level(Level::Info)
                .message(message)
                .build(),
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(10);
        assert_eq!(backoff_delay(base, 1, false), Duration::from_millis(10));
        assert_eq!(backoff_delay(base, 2, false), Duration::from_millis(20));
        assert_eq!(backoff_delay(base, 3, false), Duration::from_millis(40));
        assert_eq!(backoff_delay(base, 6, false), Duration::from_millis(320));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let base = Duration::from_millis(1_000);
        let huge = backoff_delay(base, 200, false);
        assert!(huge >= backoff_delay(base, 33, false));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let delay = backoff_delay(base, 3, true);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn take_due_respects_due_times_and_order() {
        let mut backlog = RetryBacklog::new();
        let now = Instant::now();
        backlog.schedule(queued("first"), now + Duration::from_millis(10));
        backlog.schedule(queued("second"), now + Duration::from_millis(10));
        backlog.schedule(queued("later"), now + Duration::from_millis(50));

        assert_eq!(backlog.next_due(), Some(now + Duration::from_millis(10)));
        assert!(backlog.take_due(now).is_empty());

        tokio::time::advance(Duration::from_millis(11)).await;
        let due = backlog.take_due(Instant::now());
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].event.message, "first");
        assert_eq!(due[1].event.message, "second");
        assert_eq!(backlog.len(), 1);

        tokio::time::advance(Duration::from_millis(50)).await;
        let due = backlog.take_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event.message, "later");
        assert!(backlog.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_ignores_due_times() {
        let mut backlog = RetryBacklog::new();
        let now = Instant::now();
        backlog.schedule(queued("a"), now + Duration::from_secs(3600));
        backlog.schedule(queued("b"), now + Duration::from_secs(7200));

        let drained = backlog.drain();
        assert_eq!(drained.len(), 2);
        assert!(backlog.is_empty());
        assert_eq!(backlog.next_due(), None);
    }
}
