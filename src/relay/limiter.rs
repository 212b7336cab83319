//! Per (author, channel) cooldown.
//!
//! The interval is configured per language code because it exists to protect
//! the translation backend from one language's traffic volume.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    Allowed,
    Throttled { retry_in: Duration },
}

impl Cooldown {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Cooldown::Allowed)
    }
}

pub struct RateLimiter {
    default_interval: Duration,
    overrides: HashMap<String, Duration>,
    last_accepted: Mutex<HashMap<(String, String), Instant>>,
}

impl RateLimiter {
    pub fn new(default_interval: Duration, overrides: HashMap<String, Duration>) -> Self {
        Self {
            default_interval,
            overrides: overrides.into_iter().map(|(code, d)| (code.to_ascii_lowercase(), d)).collect(),
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Cooldown for a language, falling back to the default. Codes compare case-insensitively.
    pub fn cooldown_interval(&self, language_code: &str) -> Duration {
        self.overrides
            .get(&language_code.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Check the cooldown and, when allowed, record `now` as the last accepted time.
    pub fn check(&self, author_id: &str, channel_key: &str, language_code: &str, now: Instant) -> Cooldown {
        let interval = self.cooldown_interval(language_code);
        let mut last = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());
        let key = (author_id.to_string(), channel_key.to_string());

        if let Some(&at) = last.get(&key) {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < interval {
                let retry_in = interval - elapsed;
                debug!(author = author_id, channel = channel_key, ?retry_in, "Cooldown active");
                return Cooldown::Throttled { retry_in };
            }
            if now < at {
                // Never move an entry backwards.
                return Cooldown::Allowed;
            }
        }

        last.insert(key, now);
        Cooldown::Allowed
    }

    pub fn allow(&self, author_id: &str, channel_key: &str, language_code: &str, now: Instant) -> bool {
        self.check(author_id, channel_key, language_code, now).is_allowed()
    }

    /// Forget entries whose cooldown has lapsed under every configured interval.
    pub fn sweep(&self, now: Instant) -> usize {
        let longest = self
            .overrides
            .values()
            .copied()
            .fold(self.default_interval, Duration::max);
        let mut last = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());
        let before = last.len();
        last.retain(|_, at| now.saturating_duration_since(*at) < longest);
        before - last.len()
    }

    pub fn tracked(&self) -> usize {
        self.last_accepted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
