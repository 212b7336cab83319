//! Relay engine - fans each accepted message out to every other language.
//!
//! Flow for one inbound message:
//! 1. empty / bot-authored / sentinel-tagged / unknown channel → drop
//! 2. loop guard (duplicate delivery, self-echo by id)
//! 3. cooldown per (author, channel)
//! 4. global source: translate into every language channel
//!    language source: mirror original into global, then translate into the others
//!
//! Targets are handled one after another in registry order. A failure for one
//! target never stops the others.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::relay::events::{EventSink, IgnoreReason, RelayEvent, TracingSink};
use crate::relay::guard::{GuardVerdict, LoopGuard};
use crate::relay::limiter::{Cooldown, RateLimiter};
use crate::relay::provenance::{self, GLOBAL_FLAG, Origin};
use crate::relay::registry::{ChannelRegistry, ChannelRole, LanguageChannel};
use crate::relay::transport::{
    AUTO_DETECT, InboundMessage, MessageId, OutboundKind, OutboundMessage, TranslateError, Translation,
    Translator, Transport, TransportError,
};

/// Whether messages posted in the global channel go through the cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalRateLimit {
    /// Keyed on (author, global channel) with the cooldown configured for "auto".
    #[default]
    Limited,
    Exempt,
}

/// Which language channels receive a global-channel broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalBroadcast {
    #[default]
    IncludeAll,
    /// Skip the channel whose language the translator detected as the source.
    /// Detection comes back with the translation, so that target still costs one
    /// translator call whose result is discarded.
    SkipOriginLanguage,
}

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub sentinel: String,
    pub throttle_glyph: String,
    /// How long the throttle reaction stays on the source message.
    pub throttle_indicator: Duration,
    pub translate_timeout: Duration,
    pub send_timeout: Duration,
    pub global_rate_limit: GlobalRateLimit,
    pub global_broadcast: GlobalBroadcast,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            sentinel: provenance::DEFAULT_SENTINEL.to_string(),
            throttle_glyph: "👀".to_string(),
            throttle_indicator: Duration::from_secs(3),
            translate_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            global_rate_limit: GlobalRateLimit::default(),
            global_broadcast: GlobalBroadcast::default(),
        }
    }
}

/// Per-message delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub sent: usize,
    pub translation_failed: usize,
    pub send_failed: usize,
    /// Targets left out on purpose (origin language of a global broadcast).
    pub skipped: usize,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignored(IgnoreReason),
    Duplicate,
    SelfEcho,
    Provenance,
    Throttled,
    Relayed(FanoutReport),
}

pub struct RelayEngine {
    registry: ChannelRegistry,
    guard: LoopGuard,
    limiter: RateLimiter,
    settings: RelaySettings,
    transport: Arc<dyn Transport>,
    translator: Arc<dyn Translator>,
    events: Arc<dyn EventSink>,
}

impl RelayEngine {
    pub fn new(
        registry: ChannelRegistry,
        guard: LoopGuard,
        limiter: RateLimiter,
        settings: RelaySettings,
        transport: Arc<dyn Transport>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            registry,
            guard,
            limiter,
            settings,
            transport,
            translator,
            events: Arc::new(TracingSink),
        }
    }

    /// Route events to `sink` instead of plain tracing.
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    fn emit(&self, event: RelayEvent) {
        self.events.record(event);
    }

    /// Handle `msg` on its own task. A panic inside is logged and swallowed.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<Option<Disposition>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let message_id = msg.id.clone();
            let worker = {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.handle(&msg).await })
            };
            match worker.await {
                Ok(disposition) => Some(disposition),
                Err(e) => {
                    engine.emit(RelayEvent::TaskPanicked {
                        message_id,
                        error: e.to_string(),
                    });
                    None
                }
            }
        })
    }

    /// Process one inbound message end to end.
    pub async fn handle(&self, msg: &InboundMessage) -> Disposition {
        let message_id = msg.id.clone();
        let channel = msg.channel_key.clone();

        if msg.text.is_empty() {
            self.emit(RelayEvent::Ignored { message_id, channel, reason: IgnoreReason::Empty });
            return Disposition::Ignored(IgnoreReason::Empty);
        }

        if msg.is_from_bot {
            self.emit(RelayEvent::RejectedEcho { message_id, channel });
            return Disposition::SelfEcho;
        }

        // Secondary defence: id-based guards miss redeliveries that carry new ids.
        if msg.annotated || provenance::contains_sentinel(&msg.text, &self.settings.sentinel) {
            self.emit(RelayEvent::RejectedProvenance { message_id, channel });
            return Disposition::Provenance;
        }

        let Some(role) = self.registry.role(&msg.channel_key) else {
            self.emit(RelayEvent::Ignored { message_id, channel, reason: IgnoreReason::UnknownChannel });
            return Disposition::Ignored(IgnoreReason::UnknownChannel);
        };

        let now = Instant::now();
        match self.guard.check(&msg.id, now) {
            GuardVerdict::Fresh => {}
            GuardVerdict::Duplicate => {
                self.emit(RelayEvent::RejectedDuplicate { message_id, channel });
                return Disposition::Duplicate;
            }
            GuardVerdict::SelfEcho => {
                self.emit(RelayEvent::RejectedEcho { message_id, channel });
                return Disposition::SelfEcho;
            }
        }

        let limiter_language = match role {
            ChannelRole::Language(src) => Some(src.language_code.as_str()),
            ChannelRole::Global(_) => match self.settings.global_rate_limit {
                GlobalRateLimit::Limited => Some(AUTO_DETECT),
                GlobalRateLimit::Exempt => None,
            },
        };
        if let Some(code) = limiter_language
            && let Cooldown::Throttled { retry_in } = self.limiter.check(&msg.author.id, &msg.channel_key, code, now)
        {
            self.emit(RelayEvent::RejectedThrottled {
                message_id,
                channel,
                author: msg.author.id.clone(),
                retry_in_ms: retry_in.as_millis() as u64,
            });
            self.signal_throttled(msg);
            return Disposition::Throttled;
        }

        self.emit(RelayEvent::Accepted { message_id, channel });

        let report = match role {
            ChannelRole::Global(_) => self.broadcast_from_global(msg).await,
            ChannelRole::Language(src) => self.relay_from_language(msg, src).await,
        };
        info!(
            message_id = %msg.id,
            sent = report.sent,
            translation_failed = report.translation_failed,
            send_failed = report.send_failed,
            skipped = report.skipped,
            "Relay finished"
        );
        Disposition::Relayed(report)
    }

    /// Global source: translate into every language channel, nothing back to global.
    async fn broadcast_from_global(&self, msg: &InboundMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        for target in self.registry.all_channels() {
            let Some(translation) = self.translate_for(msg, AUTO_DETECT, target, &mut report).await else {
                continue;
            };

            if self.settings.global_broadcast == GlobalBroadcast::SkipOriginLanguage
                && translation
                    .detected_source
                    .as_deref()
                    .is_some_and(|detected| same_language(detected, &target.language_code))
            {
                debug!(message_id = %msg.id, target = %target.channel_key, "Skipping origin language");
                report.skipped += 1;
                continue;
            }

            let body = provenance::render_translated(
                &msg.author.name,
                &translation.text,
                Origin::Global,
                target,
                &self.settings.sentinel,
            );
            let outbound = OutboundMessage {
                channel_key: target.channel_key.clone(),
                body,
                kind: OutboundKind::Translated,
                source_flag: Origin::Global.flag().to_string(),
                target_flag: target.display_flag.clone(),
            };
            self.send(msg, outbound, &mut report).await;
        }
        report
    }

    /// Language source: mirror the original into global, then translate into the others.
    async fn relay_from_language(&self, msg: &InboundMessage, src: &LanguageChannel) -> FanoutReport {
        let mut report = FanoutReport::default();
        let origin = Origin::Language(src);

        if let Some(global) = self.registry.global() {
            let outbound = OutboundMessage {
                channel_key: global.channel_key.clone(),
                body: provenance::render_mirror(&msg.author.name, &msg.text, src, &self.settings.sentinel),
                kind: OutboundKind::Mirrored,
                source_flag: origin.flag().to_string(),
                target_flag: GLOBAL_FLAG.to_string(),
            };
            self.send(msg, outbound, &mut report).await;
        }

        for target in self.registry.all_channels() {
            if target.channel_key == src.channel_key || target.language_code == src.language_code {
                continue;
            }
            let Some(translation) = self.translate_for(msg, &src.language_code, target, &mut report).await else {
                continue;
            };

            let body = provenance::render_translated(
                &msg.author.name,
                &translation.text,
                origin,
                target,
                &self.settings.sentinel,
            );
            let outbound = OutboundMessage {
                channel_key: target.channel_key.clone(),
                body,
                kind: OutboundKind::Translated,
                source_flag: origin.flag().to_string(),
                target_flag: target.display_flag.clone(),
            };
            self.send(msg, outbound, &mut report).await;
        }

        report
    }

    /// Translate for one target. Failures are reported and yield `None`.
    async fn translate_for(
        &self,
        msg: &InboundMessage,
        from: &str,
        target: &LanguageChannel,
        report: &mut FanoutReport,
    ) -> Option<Translation> {
        let result = match timeout(
            self.settings.translate_timeout,
            self.translator.translate(&msg.text, from, &target.language_code),
        )
        .await
        {
            Ok(Ok(t)) if t.text.trim().is_empty() => Err(TranslateError::Empty),
            Ok(result) => result,
            Err(_) => Err(TranslateError::Timeout),
        };

        match result {
            Ok(t) => Some(t),
            Err(e) => {
                report.translation_failed += 1;
                self.emit(RelayEvent::TranslationFailed {
                    message_id: msg.id.clone(),
                    target: target.channel_key.clone(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Send one outbound message and mark its id as ours.
    async fn send(&self, msg: &InboundMessage, outbound: OutboundMessage, report: &mut FanoutReport) {
        let result = match timeout(self.settings.send_timeout, self.transport.send_message(&outbound)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match result {
            Ok(sent_id) => {
                self.guard.record_sent(sent_id.clone(), Instant::now());
                report.sent += 1;
                self.emit(RelayEvent::Sent {
                    message_id: msg.id.clone(),
                    target: outbound.channel_key,
                    sent_id,
                    kind: outbound.kind,
                });
            }
            Err(e) => {
                report.send_failed += 1;
                self.emit(RelayEvent::SendFailed {
                    message_id: msg.id.clone(),
                    target: outbound.channel_key,
                    error: e.to_string(),
                });
            }
        }
    }

    /// React on the throttled message and take the reaction back after a delay.
    fn signal_throttled(&self, msg: &InboundMessage) {
        if self.settings.throttle_glyph.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let channel = msg.channel_key.clone();
        let message_id: MessageId = msg.id.clone();
        let glyph = self.settings.throttle_glyph.clone();
        let delay = self.settings.throttle_indicator;

        tokio::spawn(async move {
            if let Err(e) = transport.add_reaction(&channel, &message_id, &glyph).await {
                warn!(%message_id, %channel, "Failed to add throttle reaction: {e}");
                return;
            }
            sleep(delay).await;
            if let Err(e) = transport.remove_reaction(&channel, &message_id, &glyph).await {
                warn!(%message_id, %channel, "Failed to remove throttle reaction: {e}");
            }
        });
    }
}

/// Compare language tags on their primary subtag ("en-GB" matches "en").
fn same_language(a: &str, b: &str) -> bool {
    let primary = |s: &str| s.split(['-', '_']).next().unwrap_or(s).to_ascii_lowercase();
    primary(a) == primary(b)
}
