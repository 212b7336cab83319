use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use teloxide::types::ChatId;

use crate::relay::provenance::DEFAULT_SENTINEL;
use crate::relay::{
    ChannelRegistry, GlobalBroadcast, GlobalChannel, GlobalRateLimit, LanguageChannel, LoopGuard, RateLimiter,
    RelaySettings,
};

static LANGUAGE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z]{2,4})?$").expect("static regex"));
static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("static regex"));

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ChannelEntry {
    key: String,
    chat_id: i64,
    language: String,
    flag: String,
    #[serde(default = "default_color")]
    color: String,
}

#[derive(Deserialize)]
struct GlobalEntry {
    key: String,
    chat_id: i64,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Language channels, in fan-out order.
    channels: Vec<ChannelEntry>,
    global: Option<GlobalEntry>,
    #[serde(default = "default_sentinel")]
    sentinel: String,
    #[serde(default = "default_cooldown_ms")]
    cooldown_ms: u64,
    /// Language code -> cooldown in ms. "auto" applies to global-channel posts.
    #[serde(default)]
    cooldown_overrides: HashMap<String, u64>,
    #[serde(default = "default_throttle_indicator_ms")]
    throttle_indicator_ms: u64,
    #[serde(default = "default_throttle_glyph")]
    throttle_glyph: String,
    #[serde(default = "default_dedup_retention_secs")]
    dedup_retention_secs: u64,
    #[serde(default = "default_sent_retention_secs")]
    sent_retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
    #[serde(default = "default_timeout_ms")]
    translate_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    send_timeout_ms: u64,
    /// Override for the translation endpoint (e.g. a self-hosted mirror).
    translate_endpoint: Option<String>,
    #[serde(default)]
    global_rate_limit: GlobalRateLimit,
    #[serde(default)]
    global_broadcast: GlobalBroadcast,
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, lock). Defaults to current directory.
    data_dir: Option<String>,
    lock_file: Option<String>,
}

fn default_color() -> String {
    "#95a5a6".to_string()
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

fn default_cooldown_ms() -> u64 {
    2000
}

fn default_throttle_indicator_ms() -> u64 {
    3000
}

fn default_throttle_glyph() -> String {
    "👀".to_string()
}

fn default_dedup_retention_secs() -> u64 {
    300
}

fn default_sent_retention_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    10_000
}

pub struct Config {
    /// Path to the config file.
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub channels: Vec<LanguageChannel>,
    pub global: Option<GlobalChannel>,
    pub sentinel: String,
    pub default_cooldown: Duration,
    pub cooldown_overrides: HashMap<String, Duration>,
    pub throttle_indicator: Duration,
    pub throttle_glyph: String,
    pub dedup_retention: Duration,
    pub sent_retention: Duration,
    pub sweep_interval: Duration,
    pub translate_timeout: Duration,
    pub send_timeout: Duration,
    pub translate_endpoint: Option<String>,
    pub global_rate_limit: GlobalRateLimit,
    pub global_broadcast: GlobalBroadcast,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (logs, lock).
    pub data_dir: PathBuf,
    /// Single-instance lock file.
    pub lock_file: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        if file.channels.len() < 2 {
            return Err(ConfigError::Validation("channels must list at least two languages".into()));
        }
        if file.sentinel.trim().is_empty() {
            return Err(ConfigError::Validation("sentinel must not be empty".into()));
        }
        if file.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation("sweep_interval_secs must be positive".into()));
        }

        let channels = file
            .channels
            .into_iter()
            .map(parse_channel)
            .collect::<Result<Vec<_>, _>>()?;
        let global = file.global.map(|g| GlobalChannel {
            channel_key: g.key.trim().to_lowercase(),
            chat_id: g.chat_id,
        });

        // Same checks the registry enforces, surfaced at load time.
        ChannelRegistry::new(channels.clone(), global.clone()).map_err(ConfigError::Validation)?;

        let cooldown_overrides = file
            .cooldown_overrides
            .into_iter()
            .map(|(code, ms)| (code.trim().to_lowercase(), Duration::from_millis(ms)))
            .collect();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let lock_file = file
            .lock_file
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("babelrelay.lock"));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            channels,
            global,
            sentinel: file.sentinel,
            default_cooldown: Duration::from_millis(file.cooldown_ms),
            cooldown_overrides,
            throttle_indicator: Duration::from_millis(file.throttle_indicator_ms),
            throttle_glyph: file.throttle_glyph,
            dedup_retention: Duration::from_secs(file.dedup_retention_secs),
            sent_retention: Duration::from_secs(file.sent_retention_secs),
            sweep_interval: Duration::from_secs(file.sweep_interval_secs),
            translate_timeout: Duration::from_millis(file.translate_timeout_ms),
            send_timeout: Duration::from_millis(file.send_timeout_ms),
            translate_endpoint: file.translate_endpoint,
            global_rate_limit: file.global_rate_limit,
            global_broadcast: file.global_broadcast,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            lock_file,
        })
    }

    pub fn registry(&self) -> Result<ChannelRegistry, ConfigError> {
        ChannelRegistry::new(self.channels.clone(), self.global.clone()).map_err(ConfigError::Validation)
    }

    pub fn loop_guard(&self) -> LoopGuard {
        LoopGuard::new(self.dedup_retention, self.sent_retention)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.default_cooldown, self.cooldown_overrides.clone())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            sentinel: self.sentinel.clone(),
            throttle_glyph: self.throttle_glyph.clone(),
            throttle_indicator: self.throttle_indicator,
            translate_timeout: self.translate_timeout,
            send_timeout: self.send_timeout,
            global_rate_limit: self.global_rate_limit,
            global_broadcast: self.global_broadcast,
        }
    }

    /// Chat ids the relay listens to.
    pub fn watched_chats(&self) -> HashSet<ChatId> {
        self.channels
            .iter()
            .map(|c| ChatId(c.chat_id))
            .chain(self.global.iter().map(|g| ChatId(g.chat_id)))
            .collect()
    }
}

fn parse_channel(entry: ChannelEntry) -> Result<LanguageChannel, ConfigError> {
    let key = entry.key.trim().to_lowercase();
    if key.is_empty() {
        return Err(ConfigError::Validation("channel key must not be empty".into()));
    }
    let language = entry.language.trim().to_string();
    if !LANGUAGE_CODE.is_match(&language) {
        return Err(ConfigError::Validation(format!(
            "channel '{key}': invalid language code '{language}'"
        )));
    }
    if !HEX_COLOR.is_match(&entry.color) {
        return Err(ConfigError::Validation(format!(
            "channel '{key}': color must look like #rrggbb, got '{}'",
            entry.color
        )));
    }
    let display_color = u32::from_str_radix(&entry.color[1..], 16)
        .map_err(|e| ConfigError::Validation(format!("channel '{key}': bad color: {e}")))?;

    Ok(LanguageChannel {
        channel_key: key,
        language_code: language,
        display_flag: entry.flag,
        display_color,
        chat_id: entry.chat_id,
    })
}
