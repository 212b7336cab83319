//! Telegram transport using teloxide.
//!
//! Each language channel is a Telegram group. Message ids are only unique per
//! chat, so relay ids are encoded as `"{chat_id}:{message_id}"`.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId as TgMessageId, MessageOrigin, ParseMode, ReactionType};
use tracing::debug;

use crate::relay::registry::ChannelRegistry;
use crate::relay::transport::{Author, InboundMessage, MessageId, OutboundMessage, Transport, TransportError};

pub fn encode_message_id(chat_id: i64, message_id: i32) -> MessageId {
    MessageId(format!("{chat_id}:{message_id}"))
}

pub fn decode_message_id(id: &MessageId) -> Option<(i64, i32)> {
    let (chat, msg) = id.as_str().rsplit_once(':')?;
    Some((chat.parse().ok()?, msg.parse().ok()?))
}

/// Telegram side of the relay.
pub struct TelegramTransport {
    bot: Bot,
    registry: ChannelRegistry,
}

impl TelegramTransport {
    pub fn new(bot: Bot, registry: ChannelRegistry) -> Self {
        Self { bot, registry }
    }

    fn chat_for(&self, channel_key: &str) -> Result<ChatId, TransportError> {
        self.registry
            .chat_for_channel(channel_key)
            .map(ChatId)
            .ok_or_else(|| TransportError::UnknownChannel(channel_key.to_string()))
    }

    async fn set_reaction(
        &self,
        channel_key: &str,
        message_id: &MessageId,
        reaction: Vec<ReactionType>,
    ) -> Result<(), TransportError> {
        let chat_id = self.chat_for(channel_key)?;
        let (_, msg_id) = decode_message_id(message_id)
            .ok_or_else(|| TransportError::Rejected(format!("malformed message id '{message_id}'")))?;

        self.bot
            .set_message_reaction(chat_id, TgMessageId(msg_id))
            .reaction(reaction)
            .await
            .map_err(|e| TransportError::Rejected(format!("Failed to set reaction: {e}")))?;
        Ok(())
    }
}

// Failures are returned, not logged: the engine reports them as relay events.
#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageId, TransportError> {
        let chat_id = self.chat_for(&message.channel_key)?;
        debug!(
            channel = %message.channel_key,
            kind = ?message.kind,
            "Sending {} → {}",
            message.source_flag,
            message.target_flag
        );

        let sent = self
            .bot
            .send_message(chat_id, &message.body)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| TransportError::Rejected(format!("Failed to send to {}: {e}", message.channel_key)))?;

        Ok(encode_message_id(sent.chat.id.0, sent.id.0))
    }

    async fn add_reaction(&self, channel_key: &str, message_id: &MessageId, glyph: &str) -> Result<(), TransportError> {
        debug!("Adding reaction {} to msg {} in {}", glyph, message_id, channel_key);
        let reaction = ReactionType::Emoji {
            emoji: glyph.to_string(),
        };
        self.set_reaction(channel_key, message_id, vec![reaction]).await
    }

    async fn remove_reaction(&self, channel_key: &str, message_id: &MessageId, _glyph: &str) -> Result<(), TransportError> {
        // The bot only ever sets one reaction, so clearing removes it.
        self.set_reaction(channel_key, message_id, Vec::new()).await
    }
}

/// Convert a Telegram message into a relay message. `None` for chats outside the registry.
pub fn to_inbound(msg: &Message, registry: &ChannelRegistry, own_bot_id: Option<UserId>) -> Option<InboundMessage> {
    let channel_key = registry.channel_for_chat(msg.chat.id.0)?;
    let text = msg.text().or_else(|| msg.caption())?;

    // Anonymous admins and linked channels post as a chat. Telegram then fills
    // `from` with a placeholder bot account, which must not count as bot traffic.
    let (author, is_from_bot) = match (&msg.sender_chat, &msg.from) {
        (Some(chat), _) => (
            Author {
                id: chat.id.0.to_string(),
                name: chat.title().unwrap_or("anonymous").to_string(),
            },
            false,
        ),
        (None, Some(user)) => (
            Author {
                id: user.id.0.to_string(),
                name: user.username.clone().unwrap_or_else(|| user.full_name()),
            },
            user.is_bot,
        ),
        (None, None) => (
            Author {
                id: msg.chat.id.0.to_string(),
                name: "anonymous".to_string(),
            },
            false,
        ),
    };

    let annotated = own_bot_id.is_some_and(|own| carries_own_provenance(msg, own));

    Some(
        InboundMessage::new(encode_message_id(msg.chat.id.0, msg.id.0), author, channel_key, text)
            .from_bot(is_from_bot)
            .annotated(annotated),
    )
}

/// A human re-posting relay output: sent through our bot inline, or forwarded from one of its posts.
fn carries_own_provenance(msg: &Message, own: UserId) -> bool {
    let via_own = msg.via_bot.as_ref().is_some_and(|bot| bot.id == own);
    let forwarded_own = matches!(
        msg.forward_origin(),
        Some(MessageOrigin::User { sender_user, .. }) if sender_user.id == own
    );
    via_own || forwarded_own
}
