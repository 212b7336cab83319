//! End-to-end relay behaviour against in-memory transport and translator fakes.
//!
//! Run with: cargo test --test relay_properties

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use babelrelay::relay::events::IgnoreReason;
use babelrelay::relay::{
    Author, ChannelRegistry, Disposition, FanoutReport, GlobalChannel, InboundMessage, LanguageChannel, LoopGuard,
    MemorySink, MessageId, OutboundKind, OutboundMessage, RateLimiter, RelayEngine, RelayEvent, RelaySettings,
    TranslateError, Translation, Translator, Transport, TransportError,
};

#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    /// Channels whose sends are rejected.
    broken: HashSet<String>,
}

impl FakeTransport {
    fn broken(channels: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            broken: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn targets(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.channel_key.clone()).collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageId, TransportError> {
        if self.broken.contains(&message.channel_key) {
            return Err(TransportError::Rejected("chat not found".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(MessageId::new(format!("relay:{}", sent.len())))
    }
}

/// Prefixes the target code. Pairs in `failing` error out; pairs in `hanging` never return.
#[derive(Default)]
struct FakeTranslator {
    failing: HashSet<(String, String)>,
    hanging: HashSet<(String, String)>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTranslator {
    fn failing(pairs: &[(&str, &str)]) -> Self {
        Self {
            failing: pairs.iter().map(|(f, t)| (f.to_string(), t.to_string())).collect(),
            ..Default::default()
        }
    }

    fn hanging(pairs: &[(&str, &str)]) -> Self {
        Self {
            hanging: pairs.iter().map(|(f, t)| (f.to_string(), t.to_string())).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<Translation, TranslateError> {
        let pair = (from.to_string(), to.to_string());
        self.calls.lock().unwrap().push(pair.clone());
        if self.hanging.contains(&pair) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&pair) {
            return Err(TranslateError::Http("backend unreachable".into()));
        }
        if text == "blank" {
            return Ok(Translation::new("   "));
        }
        Ok(Translation::new(format!("<{to}> {text}")))
    }
}

fn language(key: &str, code: &str, chat_id: i64) -> LanguageChannel {
    LanguageChannel {
        channel_key: key.to_string(),
        language_code: code.to_string(),
        display_flag: code.to_uppercase(),
        display_color: 0x3498db,
        chat_id,
    }
}

struct Harness {
    engine: Arc<RelayEngine>,
    transport: Arc<FakeTransport>,
    translator: Arc<FakeTranslator>,
    events: Arc<MemorySink>,
}

fn harness_with(
    channels: Vec<LanguageChannel>,
    global: bool,
    transport: FakeTransport,
    translator: FakeTranslator,
    settings: RelaySettings,
) -> Harness {
    let global = global.then(|| GlobalChannel { channel_key: "g".into(), chat_id: -100 });
    let registry = ChannelRegistry::new(channels, global).unwrap();
    let transport = Arc::new(transport);
    let translator = Arc::new(translator);
    let events = Arc::new(MemorySink::new());
    let engine = RelayEngine::new(
        registry,
        LoopGuard::new(Duration::from_secs(300), Duration::from_secs(60)),
        RateLimiter::new(Duration::from_millis(2000), HashMap::new()),
        settings,
        transport.clone(),
        translator.clone(),
    )
    .with_events(events.clone());
    Harness { engine: Arc::new(engine), transport, translator, events }
}

/// Registry {L, A, B, C} plus global G.
fn harness(transport: FakeTransport, translator: FakeTranslator) -> Harness {
    harness_with(
        vec![language("l", "it", -1), language("a", "en", -2), language("b", "es", -3), language("c", "fr", -4)],
        true,
        transport,
        translator,
        RelaySettings::default(),
    )
}

fn message(id: &str, channel: &str, author: &str, text: &str) -> InboundMessage {
    InboundMessage::new(
        MessageId::new(id),
        Author { id: author.to_string(), name: author.to_string() },
        channel,
        text,
    )
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_fans_out_once() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    let msg = message("-1:10", "l", "u", "ciao");

    assert!(matches!(h.engine.handle(&msg).await, Disposition::Relayed(_)));
    assert_eq!(h.engine.handle(&msg).await, Disposition::Duplicate);

    // Still a duplicate late in the retention window, even with the cooldown long gone.
    tokio::time::advance(Duration::from_secs(290)).await;
    assert_eq!(h.engine.handle(&msg).await, Disposition::Duplicate);
    assert_eq!(h.transport.count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_relay_output_is_never_reprocessed() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    h.engine.handle(&message("-1:10", "l", "u", "ciao")).await;

    let sent: Vec<OutboundMessage> = h.transport.sent.lock().unwrap().clone();
    for (i, out) in sent.iter().enumerate() {
        // Re-observe each of our sends with a body stripped of the sentinel to
        // prove the id guard alone catches it.
        let echo = message(&format!("relay:{}", i + 1), &out.channel_key, "bot", "echoed text");
        assert_eq!(h.engine.handle(&echo).await, Disposition::SelfEcho);
    }
    assert_eq!(h.transport.count(), 4);
}

#[tokio::test]
async fn test_language_message_reaches_every_other_language_and_global() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    let d = h.engine.handle(&message("-1:10", "l", "u", "buongiorno")).await;

    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 4, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["g", "a", "b", "c"]);

    let sent = h.transport.sent.lock().unwrap();
    assert_eq!(sent[0].kind, OutboundKind::Mirrored);
    assert!(sent[0].body.contains("buongiorno"));
    assert!(sent[1..].iter().all(|m| m.kind == OutboundKind::Translated));
    assert!(sent[1].body.contains("&lt;en&gt; buongiorno"));
    assert!(sent.iter().all(|m| m.body.contains("|T-BOT|")));

    let calls = h.translator.calls.lock().unwrap();
    assert_eq!(
        *calls,
        [("it".to_string(), "en".to_string()), ("it".into(), "es".into()), ("it".into(), "fr".into())]
    );
}

#[tokio::test]
async fn test_global_message_broadcasts_to_languages_only() {
    let h = harness_with(
        vec![language("a", "en", -2), language("b", "es", -3), language("c", "fr", -4)],
        true,
        FakeTransport::default(),
        FakeTranslator::default(),
        RelaySettings::default(),
    );
    let d = h.engine.handle(&message("-100:1", "g", "u", "hello all")).await;

    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 3, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["a", "b", "c"]);
    assert!(h.translator.calls.lock().unwrap().iter().all(|(from, _)| from == "auto"));
}

#[tokio::test]
async fn test_no_global_channel_means_no_mirror() {
    let h = harness_with(
        vec![language("l", "it", -1), language("a", "en", -2)],
        false,
        FakeTransport::default(),
        FakeTranslator::default(),
        RelaySettings::default(),
    );
    h.engine.handle(&message("-1:1", "l", "u", "ciao")).await;
    assert_eq!(h.transport.targets(), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_blocks_bursts_but_not_spaced_messages() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());

    assert!(matches!(h.engine.handle(&message("-2:1", "a", "u", "one")).await, Disposition::Relayed(_)));
    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(h.engine.handle(&message("-2:2", "a", "u", "two")).await, Disposition::Throttled);
    assert_eq!(h.transport.count(), 4);

    let h = harness(FakeTransport::default(), FakeTranslator::default());
    assert!(matches!(h.engine.handle(&message("-2:1", "a", "u", "one")).await, Disposition::Relayed(_)));
    tokio::time::advance(Duration::from_millis(2100)).await;
    assert!(matches!(h.engine.handle(&message("-2:2", "a", "u", "two")).await, Disposition::Relayed(_)));
    assert_eq!(h.transport.count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_is_per_author_and_channel() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    assert!(matches!(h.engine.handle(&message("-2:1", "a", "u", "x")).await, Disposition::Relayed(_)));
    assert!(matches!(h.engine.handle(&message("-2:2", "a", "v", "x")).await, Disposition::Relayed(_)));
    assert!(matches!(h.engine.handle(&message("-3:1", "b", "u", "x")).await, Disposition::Relayed(_)));
}

#[tokio::test]
async fn test_failed_translation_skips_only_that_target() {
    let h = harness(FakeTransport::default(), FakeTranslator::failing(&[("it", "es")]));
    let d = h.engine.handle(&message("-1:10", "l", "u", "ciao")).await;

    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 3, translation_failed: 1, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["g", "a", "c"]);
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        RelayEvent::TranslationFailed { target, .. } if target == "b"
    )));
}

#[tokio::test]
async fn test_blank_translation_counts_as_failure() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    let d = h.engine.handle(&message("-1:10", "l", "u", "blank")).await;
    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 1, translation_failed: 3, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["g"]);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_translation_times_out_and_fanout_continues() {
    let h = harness(FakeTransport::default(), FakeTranslator::hanging(&[("it", "en")]));
    let d = h.engine.handle(&message("-1:10", "l", "u", "ciao")).await;

    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 3, translation_failed: 1, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["g", "b", "c"]);
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        RelayEvent::TranslationFailed { target, error, .. } if target == "a" && error.contains("timed out")
    )));
}

#[tokio::test]
async fn test_failed_send_does_not_abort_fanout() {
    let h = harness(FakeTransport::broken(&["g", "b"]), FakeTranslator::default());
    let d = h.engine.handle(&message("-1:10", "l", "u", "ciao")).await;

    assert_eq!(d, Disposition::Relayed(FanoutReport { sent: 2, send_failed: 2, ..Default::default() }));
    assert_eq!(h.transport.targets(), ["a", "c"]);
}

#[tokio::test]
async fn test_sentinel_in_text_produces_no_sends() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    for (id, channel) in [("-1:1", "l"), ("-100:1", "g"), ("-2:1", "a")] {
        let msg = message(id, channel, "u", "copied footer 🇮🇹 → 🇬🇧 |T-BOT|");
        assert_eq!(h.engine.handle(&msg).await, Disposition::Provenance);
    }
    assert_eq!(h.transport.count(), 0);
    assert!(h.translator.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sentinel_wins_even_when_cooldown_would_allow() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    tokio::time::advance(Duration::from_secs(10)).await;
    let msg = message("-2:1", "a", "fresh-user", "|T-BOT|");
    assert_eq!(h.engine.handle(&msg).await, Disposition::Provenance);
    assert_eq!(h.transport.count(), 0);
}

#[tokio::test]
async fn test_unrelated_channel_is_ignored() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    let d = h.engine.handle(&message("-999:1", "random-chat", "u", "hello")).await;
    assert_eq!(d, Disposition::Ignored(IgnoreReason::UnknownChannel));
    assert_eq!(h.transport.count(), 0);
}

#[tokio::test]
async fn test_events_trace_every_decision() {
    let h = harness(FakeTransport::broken(&["c"]), FakeTranslator::failing(&[("it", "es")]));
    let msg = message("-1:10", "l", "u", "ciao");
    h.engine.handle(&msg).await;
    h.engine.handle(&msg).await;

    assert_eq!(
        h.events.names(),
        ["accepted", "sent", "sent", "translation_failed", "send_failed", "rejected_duplicate"]
    );
}

#[tokio::test]
async fn test_dispatch_runs_on_its_own_task() {
    let h = harness(FakeTransport::default(), FakeTranslator::default());
    let handle = h.engine.dispatch(message("-1:10", "l", "u", "ciao"));
    let disposition = handle.await.unwrap();
    assert_eq!(disposition, Some(Disposition::Relayed(FanoutReport { sent: 4, ..Default::default() })));
}

struct PanickingTranslator;

#[async_trait]
impl Translator for PanickingTranslator {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<Translation, TranslateError> {
        panic!("translator bug");
    }
}

#[tokio::test]
async fn test_panic_in_one_message_does_not_affect_the_next() {
    let registry = ChannelRegistry::new(vec![language("l", "it", -1), language("a", "en", -2)], None).unwrap();
    let events = Arc::new(MemorySink::new());
    let engine = Arc::new(
        RelayEngine::new(
            registry,
            LoopGuard::new(Duration::from_secs(300), Duration::from_secs(60)),
            RateLimiter::new(Duration::ZERO, HashMap::new()),
            RelaySettings::default(),
            Arc::new(FakeTransport::default()),
            Arc::new(PanickingTranslator),
        )
        .with_events(events.clone()),
    );

    assert_eq!(engine.dispatch(message("-1:1", "l", "u", "a")).await.unwrap(), None);
    assert_eq!(engine.dispatch(message("-1:2", "l", "u", "b")).await.unwrap(), None);
    assert_eq!(
        events.names().iter().filter(|n| **n == "task_panicked").count(),
        2
    );
}
