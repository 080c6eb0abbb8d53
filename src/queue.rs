//! Pending queue and batch packing

use crate::event::QueuedEvent;

/// Headroom factor applied to the payload cap when packing batches, leaving
/// room for the envelope metadata wrapped around the events.
pub const BATCH_FILL_FACTOR: f64 = 0.9;
/// Fraction of the payload cap at which the queue asks for an early flush,
/// before the backlog would need many batches in a single flush.
pub const EARLY_FLUSH_FACTOR: f64 = 0.8;

/// Ordered buffer of not-yet-sent events with cumulative size accounting.
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: Vec<QueuedEvent>,
    estimated_bytes: usize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: QueuedEvent) {
        self.estimated_bytes += event.estimated_size_bytes;
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// True once the queue reaches the batch count cap or the early-flush
    /// size threshold.
    pub fn should_flush(&self, max_batch_count: usize, max_payload_bytes: usize) -> bool {
        if self.events.is_empty() {
            return false;
        }
        self.events.len() >= max_batch_count
            || self.estimated_bytes >= scaled(max_payload_bytes, EARLY_FLUSH_FACTOR)
    }

    /// Drain the queue, returning its contents in enqueue order.
    pub fn take_all(&mut self) -> Vec<QueuedEvent> {
        self.estimated_bytes = 0;
        std::mem::take(&mut self.events)
    }
}

fn scaled(bytes: usize, factor: f64) -> usize {
    (bytes as f64 * factor) as usize
}

/// Partition the retry backlog plus pending events into transmission batches.
///
/// Retries go ahead of new events, so earlier records keep their relative
/// delivery order across attempts. Packing is greedy: a new batch starts when
/// the next item would exceed `max_batch_count` or push cumulative size past
/// `max_payload_bytes * 0.9`. An item that alone exceeds the cap still gets a
/// batch of its own; size never drops an event.
pub fn pack_batches(
    retries: Vec<QueuedEvent>,
    pending: Vec<QueuedEvent>,
    max_batch_count: usize,
    max_payload_bytes: usize,
) -> Vec<Vec<QueuedEvent>> {
    let cap_bytes = scaled(max_payload_bytes, BATCH_FILL_FACTOR);
    let mut batches = Vec::new();
    let mut current: Vec<QueuedEvent> = Vec::new();
    let mut current_size = 0usize;

    for event in retries.into_iter().chain(pending) {
        if current.len() >= max_batch_count
            || (current_size + event.estimated_size_bytes > cap_bytes && !current.is_empty())
        {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += event.estimated_size_bytes;
        current.push(event);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
