//! Outbound collaborators the relay depends on.
//!
//! `TelegramChannel` implements both traits; tests use in-process fakes.

use crate::relay::ids::{ChatId, MessageId, TopicId};
use async_trait::async_trait;

/// Where an outbound message goes: a chat, optionally a topic inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chat: ChatId,
    pub topic: Option<TopicId>,
}

impl Destination {
    pub fn chat(chat: impl Into<ChatId>) -> Self {
        Self {
            chat: chat.into(),
            topic: None,
        }
    }

    pub fn topic(chat: ChatId, topic: TopicId) -> Self {
        Self {
            chat,
            topic: Some(topic),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("response missing {0}")]
    MissingField(&'static str),
}

/// Channel management: creates per-user sub-channels in the shared space.
#[async_trait]
pub trait ForumManager: Send + Sync {
    async fn create_topic(&self, chat: ChatId, name: &str) -> Result<TopicId, TransportError>;
}

/// Message transport. Both calls return the id of the message that was created.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_text(
        &self,
        to: Destination,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError>;

    async fn send_photo(
        &self,
        to: Destination,
        photo: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, TransportError>;
}
