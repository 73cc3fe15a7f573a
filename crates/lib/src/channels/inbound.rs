//! Inbound event: one Telegram message, reduced to what the relay router needs.

use crate::channels::telegram::{PhotoSize, TelegramMessage};
use crate::relay::ids::{ChatId, MessageId, TopicId, UserId};

/// Which side of the bridge the event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Private chat between an end user and the bot.
    Direct,
    /// A group chat; only the configured shared group is relayed.
    Group,
    /// Channels and anything else.
    Other,
}

impl Origin {
    pub fn from_chat_type(kind: &str) -> Self {
        match kind {
            "private" => Origin::Direct,
            "supergroup" | "group" => Origin::Group,
            _ => Origin::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub origin: Origin,
    pub chat: ChatId,
    pub message_id: MessageId,
    pub sender: UserId,
    /// Authored by a bot account (including this one).
    pub sender_is_bot: bool,
    pub topic: Option<TopicId>,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// file_id of the largest photo variant.
    pub photo: Option<String>,
    pub has_document: bool,
    /// Explicit reply target, never the topic root.
    pub reply_to: Option<MessageId>,
}

impl InboundEvent {
    /// `None` for messages without a sender (channel posts).
    pub fn from_telegram(msg: &TelegramMessage) -> Option<Self> {
        let from = msg.from.as_ref()?;
        let topic = msg.message_thread_id.map(TopicId);
        // Plain messages in a forum topic arrive as replies to the topic's root message.
        let reply_to = msg
            .reply_to_message
            .as_ref()
            .map(|r| r.message_id)
            .filter(|id| Some(*id) != msg.message_thread_id)
            .map(MessageId);
        Some(Self {
            origin: Origin::from_chat_type(&msg.chat.kind),
            chat: ChatId(msg.chat.id),
            message_id: MessageId(msg.message_id),
            sender: UserId(from.id),
            sender_is_bot: from.is_bot,
            topic,
            text: msg.text.clone().filter(|t| !t.is_empty()),
            caption: msg.caption.clone().filter(|c| !c.is_empty()),
            photo: msg.photo.as_deref().and_then(largest_photo),
            has_document: msg.document.is_some(),
            reply_to,
        })
    }

    /// One-line summary for logs.
    pub fn describe(&self) -> String {
        format!(
            "chat={} origin={:?} thread={} from={} text={}",
            self.chat,
            self.origin,
            self.topic
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.sender,
            self.text.as_deref().unwrap_or("[non-text]")
        )
    }
}

/// Highest-resolution variant; Telegram lists sizes ascending, so ties go to the later one.
fn largest_photo(sizes: &[PhotoSize]) -> Option<String> {
    sizes
        .iter()
        .enumerate()
        .max_by_key(|(i, p)| (u64::from(p.width) * u64::from(p.height), *i))
        .map(|(_, p)| p.file_id.clone())
}
