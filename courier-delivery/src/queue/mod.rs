//! Priority and schedule aware retry queue
//!
//! Entries wait here from admission until a terminal outcome. A dispatch
//! claims the best eligible entry by setting `processing_started_at`; the
//! claim is released by [`RetryQueue::mark_failed`] (optionally pushing the
//! entry into the future) or ended by [`RetryQueue::mark_completed`].
//!
//! Selection and claim happen under one lock, so an entry is never handed to
//! two dispatches at once.

pub mod retry;

use std::{collections::HashMap, sync::Arc, time::Duration};

use courier_common::Message;
use tokio::time::Instant;

use crate::types::QueueEntry;

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    next_sequence: u64,
}

/// Holding area for messages awaiting (re)delivery
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    state: Arc<parking_lot::Mutex<QueueState>>,
}

impl RetryQueue {
    /// Create a new empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message, immediately eligible for dispatch
    ///
    /// Re-enqueueing a known id replaces its entry.
    pub fn enqueue(&self, message: Message) {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let id = message.id.clone();
        state
            .entries
            .insert(id, QueueEntry::new(message, Instant::now(), sequence));
    }

    /// Claim the best eligible entry
    ///
    /// Eligible entries are unclaimed and scheduled at or before now; the
    /// best has the highest priority, then the earliest `created_at`.
    pub fn dequeue_next(&self) -> Option<QueueEntry> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let entry = state
            .entries
            .values_mut()
            .filter(|entry| entry.is_eligible(now))
            .min_by_key(|entry| entry.dispatch_key())?;

        entry.processing_started_at = Some(now);
        Some(entry.clone())
    }

    /// Remove an entry after a terminal outcome
    pub fn mark_completed(&self, id: &str) -> Option<QueueEntry> {
        self.state.lock().entries.remove(id)
    }

    /// Release a claim, optionally delaying the next dispatch by `retry_delay`
    ///
    /// Returns `false` if the id is not queued.
    pub fn mark_failed(&self, id: &str, retry_delay: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(id) else {
            return false;
        };

        entry.processing_started_at = None;
        if let Some(delay) = retry_delay {
            entry.scheduled_at = Instant::now() + delay;
        }
        true
    }

    /// Replace the message carried by a queued entry, keeping its schedule
    ///
    /// Returns `false` if the id is not queued.
    pub fn update_message(&self, message: &Message) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&message.id) else {
            return false;
        };

        entry.message = message.clone();
        true
    }

    /// Get a copy of a queued entry
    pub fn get(&self, id: &str) -> Option<QueueEntry> {
        self.state.lock().entries.get(id).cloned()
    }

    /// Every queued entry in dispatch order, ignoring schedule
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<_> = self.state.lock().entries.values().cloned().collect();
        entries.sort_by_key(QueueEntry::dispatch_key);
        entries
    }

    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Entries not currently claimed, including those scheduled in the future
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.is_processing())
            .count()
    }

    /// Entries currently claimed by a dispatch
    pub fn processing_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_processing())
            .count()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_common::Priority;

    use super::*;

    fn message(id: &str, priority: Priority) -> Message {
        Message::new(id, "a@x.com", "s", "m", priority)
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_beats_age() {
        let queue = RetryQueue::new();
        queue.enqueue(message("low", Priority::Low));
        queue.enqueue(message("high", Priority::High));
        queue.enqueue(message("normal", Priority::Normal));

        assert_eq!(queue.dequeue_next().unwrap().id(), "high");
        assert_eq!(queue.dequeue_next().unwrap().id(), "normal");
        assert_eq!(queue.dequeue_next().unwrap().id(), "low");
        assert!(queue.dequeue_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_priority_is_fifo() {
        let queue = RetryQueue::new();
        let mut older = message("older", Priority::Normal);
        older.created_at -= chrono::Duration::seconds(5);

        queue.enqueue(message("newer", Priority::Normal));
        queue.enqueue(older);

        assert_eq!(queue.dequeue_next().unwrap().id(), "older");
        assert_eq!(queue.dequeue_next().unwrap().id(), "newer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_entry_not_returned_twice() {
        let queue = RetryQueue::new();
        queue.enqueue(message("only", Priority::High));

        let claimed = queue.dequeue_next().unwrap();
        assert!(claimed.is_processing());
        assert!(queue.dequeue_next().is_none());
        assert_eq!(queue.processing_count(), 1);
        assert_eq!(queue.pending_count(), 0);

        assert!(queue.mark_failed("only", None));
        assert_eq!(queue.dequeue_next().unwrap().id(), "only");
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_entry_hidden_until_due() {
        let queue = RetryQueue::new();
        queue.enqueue(message("later", Priority::High));
        queue.dequeue_next().unwrap();
        queue.mark_failed("later", Some(Duration::from_secs(2)));

        assert!(queue.dequeue_next().is_none());
        assert_eq!(queue.pending_count(), 1);

        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert!(queue.dequeue_next().is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(queue.dequeue_next().unwrap().id(), "later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_high_does_not_block_low() {
        let queue = RetryQueue::new();
        queue.enqueue(message("high", Priority::High));
        queue.dequeue_next().unwrap();
        queue.mark_failed("high", Some(Duration::from_secs(10)));
        queue.enqueue(message("low", Priority::Low));

        assert_eq!(queue.dequeue_next().unwrap().id(), "low");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_removes_entry() {
        let queue = RetryQueue::new();
        queue.enqueue(message("a", Priority::Normal));
        queue.enqueue(message("b", Priority::Normal));
        assert_eq!(queue.size(), 2);

        assert!(queue.mark_completed("a").is_some());
        assert!(queue.mark_completed("a").is_none());
        assert!(queue.get("a").is_none());
        assert!(!queue.mark_failed("a", None));
        assert_eq!(queue.size(), 1);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_message_keeps_schedule() {
        let queue = RetryQueue::new();
        let mut msg = message("a", Priority::Normal);
        queue.enqueue(msg.clone());
        queue.dequeue_next().unwrap();
        queue.mark_failed("a", Some(Duration::from_secs(4)));
        let scheduled = queue.get("a").unwrap().scheduled_at;

        msg.retry_count = 1;
        assert!(queue.update_message(&msg));

        let entry = queue.get("a").unwrap();
        assert_eq!(entry.message.retry_count, 1);
        assert_eq!(entry.scheduled_at, scheduled);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
    }
}
