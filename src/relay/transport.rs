//! Collaborator contracts: the chat transport and the translation backend.
//!
//! The relay never talks to a platform or a translation API directly. It
//! consumes these two traits, which keeps the engine testable with in-memory
//! fakes and lets the binary plug in teloxide and the HTTP translator.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque, transport-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who wrote an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Stable platform id, used as the cooldown key.
    pub id: String,
    /// Display name shown in the relayed copy.
    pub name: String,
}

/// A message observed by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub author: Author,
    pub channel_key: String,
    /// Trimmed message text.
    pub text: String,
    /// The platform flags the sender as a bot.
    pub is_from_bot: bool,
    /// The transport found the relay's provenance annotation on the message.
    pub annotated: bool,
}

impl InboundMessage {
    pub fn new(id: MessageId, author: Author, channel_key: impl Into<String>, text: &str) -> Self {
        Self {
            id,
            author,
            channel_key: channel_key.into(),
            text: text.trim().to_string(),
            is_from_bot: false,
            annotated: false,
        }
    }

    pub fn from_bot(mut self, is_from_bot: bool) -> Self {
        self.is_from_bot = is_from_bot;
        self
    }

    pub fn annotated(mut self, annotated: bool) -> Self {
        self.annotated = annotated;
        self
    }
}

/// Whether an outbound copy is a translation or the untranslated original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Translated,
    Mirrored,
}

/// A rendered message the relay asks the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_key: String,
    /// Rendered HTML body, provenance footer included.
    pub body: String,
    pub kind: OutboundKind,
    /// Presentation glyphs of the source and destination, for transports to label the copy.
    pub source_flag: String,
    pub target_flag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel key has no address on this transport.
    UnknownChannel(String),
    /// The platform refused the request.
    Rejected(String),
    /// The call did not complete in time.
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChannel(key) => write!(f, "no destination for channel '{key}'"),
            Self::Rejected(e) => write!(f, "transport rejected request: {e}"),
            Self::Timeout => write!(f, "transport call timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Chat platform the relay sends through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message and return the id the platform assigned to it.
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageId, TransportError>;

    /// Put a reaction on a message. Transports without reactions may ignore this.
    async fn add_reaction(
        &self,
        _channel_key: &str,
        _message_id: &MessageId,
        _glyph: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Take a reaction back off a message.
    async fn remove_reaction(
        &self,
        _channel_key: &str,
        _message_id: &MessageId,
        _glyph: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Result of a successful translation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Language the backend detected for the input, when it reports one.
    pub detected_source: Option<String>,
}

impl Translation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            detected_source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
    Timeout,
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP error: {e}"),
            Self::Api(e) => write!(f, "API error: {e}"),
            Self::Parse(e) => write!(f, "Parse error: {e}"),
            Self::Empty => write!(f, "Empty translation"),
            Self::Timeout => write!(f, "Translation timed out"),
        }
    }
}

impl std::error::Error for TranslateError {}

/// Source language passed to the translator.
pub const AUTO_DETECT: &str = "auto";

/// Translation backend.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `from` (a language code or [`AUTO_DETECT`]) into `to`.
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<Translation, TranslateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_text_is_trimmed() {
        let msg = InboundMessage::new(
            MessageId::new("1:1"),
            Author { id: "7".into(), name: "alice".into() },
            "chat-en",
            "  hello there \n",
        );
        assert_eq!(msg.text, "hello there");
        assert!(!msg.is_from_bot);
        assert!(!msg.annotated);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::UnknownChannel("chat-xx".into()).to_string(),
            "no destination for channel 'chat-xx'"
        );
        assert_eq!(TranslateError::Empty.to_string(), "Empty translation");
    }
}
