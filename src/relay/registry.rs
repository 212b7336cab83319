//! Static mapping of channel keys to languages.

use std::collections::HashMap;

/// One language-specific destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageChannel {
    pub channel_key: String,
    pub language_code: String,
    pub display_flag: String,
    /// 0xRRGGBB accent.
    pub display_color: u32,
    /// Transport address of the channel.
    pub chat_id: i64,
}

/// The hub channel that receives originals and broadcasts to every language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalChannel {
    pub channel_key: String,
    pub chat_id: i64,
}

/// What a channel key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole<'a> {
    Global(&'a GlobalChannel),
    Language(&'a LanguageChannel),
}

/// Immutable registry built once at startup.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<LanguageChannel>,
    by_key: HashMap<String, usize>,
    global: Option<GlobalChannel>,
}

impl ChannelRegistry {
    /// Build the registry. Keys, language codes and chat ids must be unique.
    pub fn new(channels: Vec<LanguageChannel>, global: Option<GlobalChannel>) -> Result<Self, String> {
        let mut by_key = HashMap::with_capacity(channels.len());
        let mut codes = HashMap::with_capacity(channels.len());
        let mut chats = HashMap::with_capacity(channels.len() + 1);

        for (idx, channel) in channels.iter().enumerate() {
            if by_key.insert(channel.channel_key.clone(), idx).is_some() {
                return Err(format!("duplicate channel key '{}'", channel.channel_key));
            }
            if let Some(other) = codes.insert(channel.language_code.clone(), &channel.channel_key) {
                return Err(format!(
                    "language '{}' is used by both '{}' and '{}'",
                    channel.language_code, other, channel.channel_key
                ));
            }
            if chats.insert(channel.chat_id, &channel.channel_key).is_some() {
                return Err(format!("chat {} is mapped more than once", channel.chat_id));
            }
        }

        if let Some(ref g) = global {
            if by_key.contains_key(&g.channel_key) {
                return Err(format!("global key '{}' collides with a language channel", g.channel_key));
            }
            if chats.contains_key(&g.chat_id) {
                return Err(format!("global chat {} is also a language channel", g.chat_id));
            }
        }

        Ok(Self { channels, by_key, global })
    }

    /// Look up a language channel by key.
    pub fn resolve_channel(&self, channel_key: &str) -> Option<&LanguageChannel> {
        self.by_key.get(channel_key).map(|&idx| &self.channels[idx])
    }

    /// Language channels in configuration order.
    pub fn all_channels(&self) -> &[LanguageChannel] {
        &self.channels
    }

    pub fn global(&self) -> Option<&GlobalChannel> {
        self.global.as_ref()
    }

    pub fn global_channel_key(&self) -> Option<&str> {
        self.global.as_ref().map(|g| g.channel_key.as_str())
    }

    pub fn is_global(&self, channel_key: &str) -> bool {
        self.global_channel_key() == Some(channel_key)
    }

    /// Classify a channel key, or `None` for channels outside the configured set.
    pub fn role(&self, channel_key: &str) -> Option<ChannelRole<'_>> {
        match self.global {
            Some(ref g) if g.channel_key == channel_key => Some(ChannelRole::Global(g)),
            _ => self.resolve_channel(channel_key).map(ChannelRole::Language),
        }
    }

    /// Map a transport chat id back to its channel key.
    pub fn channel_for_chat(&self, chat_id: i64) -> Option<&str> {
        if let Some(ref g) = self.global
            && g.chat_id == chat_id
        {
            return Some(&g.channel_key);
        }
        self.channels
            .iter()
            .find(|c| c.chat_id == chat_id)
            .map(|c| c.channel_key.as_str())
    }

    /// Transport address for a channel key (language or global).
    pub fn chat_for_channel(&self, channel_key: &str) -> Option<i64> {
        match self.role(channel_key)? {
            ChannelRole::Global(g) => Some(g.chat_id),
            ChannelRole::Language(c) => Some(c.chat_id),
        }
    }
}

#[cfg(test)]
pub(crate) fn channel(key: &str, code: &str, chat_id: i64) -> LanguageChannel {
    LanguageChannel {
        channel_key: key.to_string(),
        language_code: code.to_string(),
        display_flag: format!("[{}]", code.to_uppercase()),
        display_color: 0x95a5a6,
        chat_id,
    }
}
