//! Mirrors relay logs into a Telegram chat for the operators.
//!
//! WARN/ERROR lines go out immediately. Relay events arrive on their own feed
//! from the engine and are only counted, then posted as a periodic digest, so
//! a busy community does not flood the log chat.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::relay::events::TimedEvent;
use crate::relay::provenance::truncate_chars;

/// Telegram caps messages at 4096 chars.
const MAX_LOG_CHARS: usize = 4000;

pub struct RelayLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl RelayLogLayer {
    /// `events` is the feed of a [`ChannelSink`](crate::relay::ChannelSink) attached to the engine.
    pub fn new(
        bot: Bot,
        chat_id: ChatId,
        mut events: mpsc::UnboundedReceiver<TimedEvent>,
        digest_every: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut digest = Digest::default();
            let mut events_open = true;
            let mut interval = tokio::time::interval(digest_every);
            interval.tick().await;

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(text) => send_log(&bot, chat_id, &text).await,
                        None => break,
                    },
                    event = events.recv(), if events_open => match event {
                        Some(event) => digest.record(&event),
                        None => events_open = false,
                    },
                    _ = interval.tick() => {
                        if let Some(text) = digest.take() {
                            send_log(&bot, chat_id, &text).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = truncate_chars(text, MAX_LOG_CHARS);
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

/// Event counts since the last digest, whatever their log level.
#[derive(Default)]
struct Digest {
    counts: BTreeMap<&'static str, u64>,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

impl Digest {
    fn record(&mut self, event: &TimedEvent) {
        *self.counts.entry(event.event.name()).or_insert(0) += 1;
        if self.first.is_none() {
            self.first = Some(event.at);
        }
        self.last = Some(event.at);
    }

    /// Render and reset. `None` if nothing happened.
    fn take(&mut self) -> Option<String> {
        let digest = std::mem::take(self);
        let (Some(first), Some(last)) = (digest.first, digest.last) else {
            return None;
        };
        let parts: Vec<String> = digest.counts.iter().map(|(name, n)| format!("{name} {n}")).collect();
        Some(format!(
            "📊 relay {}-{} UTC: {}",
            first.format("%H:%M"),
            last.format("%H:%M"),
            parts.join(", ")
        ))
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            name => self.fields.push(format!("{name}={value}")),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            name => self.fields.push(format!("{name}={value:?}")),
        }
    }
}

impl EventVisitor {
    fn line(&self) -> String {
        if self.fields.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, self.fields.join(", "))
        }
    }
}

impl<S: Subscriber> Layer<S> for RelayLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        let icon = match level {
            Level::ERROR => "❌",
            Level::WARN => "⚠️",
            _ => return,
        };

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(format!("{icon} {}", visitor.line())).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
