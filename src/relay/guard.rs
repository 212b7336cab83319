//! Duplicate and self-echo suppression keyed by message id.
//!
//! Two stores with separate retention windows:
//! - `seen`: inbound ids that started processing (redelivery guard)
//! - `sent`: ids of messages the relay itself sent (self-echo guard)
//!
//! An entry older than its window is dead even before `sweep` removes it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::relay::transport::MessageId;

/// Outcome of checking an inbound id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// First sighting; now recorded as in flight.
    Fresh,
    /// Already processed or in flight.
    Duplicate,
    /// One of the relay's own messages.
    SelfEcho,
}

#[derive(Default)]
struct GuardState {
    seen: HashMap<MessageId, Instant>,
    sent: HashMap<MessageId, Instant>,
}

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub seen: usize,
    pub sent: usize,
}

pub struct LoopGuard {
    state: Mutex<GuardState>,
    dedup_retention: Duration,
    sent_retention: Duration,
}

impl LoopGuard {
    pub fn new(dedup_retention: Duration, sent_retention: Duration) -> Self {
        Self {
            state: Mutex::new(GuardState::default()),
            dedup_retention,
            sent_retention,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check an inbound id and record it if fresh. Check and insert happen under one lock.
    pub fn check(&self, id: &MessageId, now: Instant) -> GuardVerdict {
        let mut state = self.lock();

        if let Some(&at) = state.sent.get(id)
            && now.saturating_duration_since(at) < self.sent_retention
        {
            return GuardVerdict::SelfEcho;
        }

        if let Some(&at) = state.seen.get(id)
            && now.saturating_duration_since(at) < self.dedup_retention
        {
            return GuardVerdict::Duplicate;
        }

        state.seen.insert(id.clone(), now);
        GuardVerdict::Fresh
    }

    /// True if the message should be processed (and it is now marked as seen).
    pub fn should_process(&self, id: &MessageId, now: Instant) -> bool {
        self.check(id, now) == GuardVerdict::Fresh
    }

    /// Remember an id the relay just sent.
    pub fn record_sent(&self, id: MessageId, now: Instant) {
        self.lock().sent.insert(id, now);
    }

    /// Drop expired entries from both stores.
    pub fn sweep(&self, now: Instant) -> SweepStats {
        let mut state = self.lock();
        let (seen_before, sent_before) = (state.seen.len(), state.sent.len());

        let dedup = self.dedup_retention;
        let sent = self.sent_retention;
        state.seen.retain(|_, at| now.saturating_duration_since(*at) < dedup);
        state.sent.retain(|_, at| now.saturating_duration_since(*at) < sent);

        let stats = SweepStats {
            seen: seen_before - state.seen.len(),
            sent: sent_before - state.sent.len(),
        };
        if stats.seen + stats.sent > 0 {
            debug!(seen = stats.seen, sent = stats.sent, "Swept loop guard");
        }
        stats
    }

    /// Current (seen, sent) store sizes.
    pub fn sizes(&self) -> (usize, usize) {
        let state = self.lock();
        (state.seen.len(), state.sent.len())
    }
}
