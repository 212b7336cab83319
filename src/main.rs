use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use babelrelay::config::Config;
use babelrelay::lease::InstanceLease;
use babelrelay::relay::{ChannelSink, EventSink, RelayEngine, Sweeper};
use babelrelay::relay_log::RelayLogLayer;
use babelrelay::telegram::{self, TelegramTransport};
use babelrelay::translate::GoogleTranslator;

/// How often the log chat gets a relay digest.
const LOG_DIGEST_INTERVAL: Duration = Duration::from_secs(300);

struct BotState {
    engine: Arc<RelayEngine>,
    own_id: Option<UserId>,
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("babelrelay: {msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "babelrelay.json".to_string());
    let config = Config::load(&config_path).unwrap_or_else(|e| fail(e));

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("babelrelay.log"))
        .unwrap_or_else(|e| fail(format!("failed to open log file: {e}")));
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    // With a log chat, relay events also feed its periodic digest.
    let event_sink: Option<Arc<dyn EventSink>> = match config.log_chat_id {
        Some(log_chat_id) => {
            let (sink, feed) = ChannelSink::new();
            registry
                .with(RelayLogLayer::new(bot.clone(), log_chat_id, feed, LOG_DIGEST_INTERVAL))
                .init();
            Some(Arc::new(sink))
        }
        None => {
            registry.init();
            None
        }
    };

    info!("🚀 Starting babelrelay...");
    info!("Loaded config from {config_path}");

    let _lease = InstanceLease::acquire(&config.lock_file).unwrap_or_else(|e| fail(e));

    let channel_registry = config.registry().unwrap_or_else(|e| fail(e));
    for channel in channel_registry.all_channels() {
        info!(
            "Language channel {} {} ({}, #{:06x}) → chat {}",
            channel.display_flag, channel.channel_key, channel.language_code, channel.display_color, channel.chat_id
        );
    }
    match channel_registry.global() {
        Some(global) => info!("Global channel {} → chat {}", global.channel_key, global.chat_id),
        None => warn!("No global channel configured; originals will not be mirrored"),
    }
    info!("Watching {} chats", config.watched_chats().len());
    info!(
        "Global channel policy: rate limit {:?}, broadcast {:?}",
        config.global_rate_limit, config.global_broadcast
    );

    let own_id = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.id)
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            None
        }
    };
    info!("Bots only see group chatter with privacy mode disabled (BotFather /setprivacy)");

    let translator = GoogleTranslator::new(config.translate_endpoint.clone(), config.translate_timeout)
        .unwrap_or_else(|e| fail(e));
    let transport = TelegramTransport::new(bot.clone(), channel_registry.clone());

    let mut engine = RelayEngine::new(
        channel_registry,
        config.loop_guard(),
        config.rate_limiter(),
        config.relay_settings(),
        Arc::new(transport),
        Arc::new(translator),
    );
    if let Some(sink) = event_sink {
        engine = engine.with_events(sink);
    }
    let engine = Arc::new(engine);
    let _sweeper = Sweeper::start(engine.clone(), config.sweep_interval);

    let state = Arc::new(BotState { engine, own_id });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("👋 Shutting down");
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    // Chats outside the registry are not ours to relay.
    let Some(inbound) = telegram::to_inbound(&msg, state.engine.registry(), state.own_id) else {
        return Ok(());
    };

    // Detached: one slow translation must not hold up the dispatcher.
    let _ = state.engine.dispatch(inbound);
    Ok(())
}
