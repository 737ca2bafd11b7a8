//! Bounded FIFO of transcripts awaiting delivery.
//!
//! Consumption is peek-then-confirm: the front item stays in place while a
//! delivery is in flight and is popped only once the send succeeds.

use std::collections::VecDeque;

/// A queued transcript with a sequence number unique within its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTranscript {
    /// Monotonic sequence number assigned on push.
    pub seq: u64,
    /// Transcript text.
    pub text: String,
}

/// Outcome of [`TranscriptQueue::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended without eviction.
    Enqueued,
    /// Appended after evicting the oldest entry (returned).
    DroppedOldest(QueuedTranscript),
    /// Blank text, not queued.
    Ignored,
}

/// Sliding window of the most recent undelivered transcripts.
#[derive(Debug, Clone)]
pub struct TranscriptQueue {
    capacity: usize,
    next_seq: u64,
    pending: VecDeque<QueuedTranscript>,
}

impl TranscriptQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_seq: 0,
            pending: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of items retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append `text`, evicting the oldest item when over capacity.
    pub fn push(&mut self, text: impl Into<String>) -> PushOutcome {
        let text = text.into();
        if text.trim().is_empty() {
            return PushOutcome::Ignored;
        }

        let item = QueuedTranscript {
            seq: self.next_seq,
            text,
        };
        self.next_seq += 1;
        self.pending.push_back(item);

        if self.pending.len() > self.capacity {
            match self.pending.pop_front() {
                Some(evicted) => PushOutcome::DroppedOldest(evicted),
                None => PushOutcome::Enqueued,
            }
        } else {
            PushOutcome::Enqueued
        }
    }

    /// The oldest item, without removing it.
    #[must_use]
    pub fn peek_front(&self) -> Option<&QueuedTranscript> {
        self.pending.front()
    }

    /// Remove and return the oldest item.
    pub fn pop_front(&mut self) -> Option<QueuedTranscript> {
        self.pending.pop_front()
    }

    /// Pop the front item only if it is still the one identified by `seq`.
    ///
    /// Used to confirm a delivery: if the queue was cleared or the item was
    /// evicted while the send was in flight, nothing is removed.
    pub fn confirm_front(&mut self, seq: u64) -> Option<QueuedTranscript> {
        if self.pending.front().is_some_and(|f| f.seq == seq) {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Remove everything; returns how many items were dropped.
    pub fn clear(&mut self) -> usize {
        let cleared = self.pending.len();
        self.pending.clear();
        cleared
    }

    /// Iterate texts oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|q| q.text.as_str())
    }
}

impl Default for TranscriptQueue {
    fn default() -> Self {
        Self::new(6)
    }
}
