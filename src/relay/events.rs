//! Structured relay decisions.
//!
//! One event per decision point, so a logger or metrics sink can rebuild what
//! the relay did without parsing prose.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relay::transport::{MessageId, OutboundKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Empty,
    UnknownChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    Accepted {
        message_id: MessageId,
        channel: String,
    },
    Ignored {
        message_id: MessageId,
        channel: String,
        reason: IgnoreReason,
    },
    RejectedDuplicate {
        message_id: MessageId,
        channel: String,
    },
    RejectedEcho {
        message_id: MessageId,
        channel: String,
    },
    RejectedProvenance {
        message_id: MessageId,
        channel: String,
    },
    RejectedThrottled {
        message_id: MessageId,
        channel: String,
        author: String,
        retry_in_ms: u64,
    },
    TranslationFailed {
        message_id: MessageId,
        target: String,
        error: String,
    },
    SendFailed {
        message_id: MessageId,
        target: String,
        error: String,
    },
    Sent {
        message_id: MessageId,
        target: String,
        sent_id: MessageId,
        kind: OutboundKind,
    },
    TaskPanicked {
        message_id: MessageId,
        error: String,
    },
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Ignored { .. } => "ignored",
            Self::RejectedDuplicate { .. } => "rejected_duplicate",
            Self::RejectedEcho { .. } => "rejected_echo",
            Self::RejectedProvenance { .. } => "rejected_provenance",
            Self::RejectedThrottled { .. } => "rejected_throttled",
            Self::TranslationFailed { .. } => "translation_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::Sent { .. } => "sent",
            Self::TaskPanicked { .. } => "task_panicked",
        }
    }
}

/// An event plus the wall-clock time it happened.
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RelayEvent,
}

/// Receiver of relay events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: RelayEvent);
}

/// Emits every event as a `tracing` record with structured fields.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: RelayEvent) {
        let name = event.name();
        match event {
            RelayEvent::Accepted { message_id, channel } => {
                info!(event = name, %message_id, %channel, "📨 Accepted");
            }
            RelayEvent::Ignored { message_id, channel, reason } => {
                debug!(event = name, %message_id, %channel, ?reason, "Ignored");
            }
            RelayEvent::RejectedDuplicate { message_id, channel }
            | RelayEvent::RejectedEcho { message_id, channel }
            | RelayEvent::RejectedProvenance { message_id, channel } => {
                debug!(event = name, %message_id, %channel, "Rejected");
            }
            RelayEvent::RejectedThrottled { message_id, channel, author, retry_in_ms } => {
                info!(event = name, %message_id, %channel, %author, retry_in_ms, "⏳ Throttled");
            }
            RelayEvent::TranslationFailed { message_id, target, error } => {
                warn!(event = name, %message_id, %target, %error, "Translation failed");
            }
            RelayEvent::SendFailed { message_id, target, error } => {
                warn!(event = name, %message_id, %target, %error, "Send failed");
            }
            RelayEvent::Sent { message_id, target, sent_id, kind } => {
                info!(event = name, %message_id, %target, %sent_id, ?kind, "📤 Sent");
            }
            RelayEvent::TaskPanicked { message_id, error } => {
                tracing::error!(event = name, %message_id, %error, "Relay task panicked");
            }
        }
    }
}

/// Forwards timestamped events to a channel, after logging them.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TimedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn record(&self, event: RelayEvent) {
        TracingSink.record(event.clone());
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(TimedEvent { at: Utc::now(), event });
    }
}

/// Keeps every event in memory. Handy for tests and diagnostics.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RelayEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RelayEvent::name).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: RelayEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
