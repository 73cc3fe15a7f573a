//! Relay core: topic directory, correlation store, their persistence, and the engine that
//! runs one inbound event to completion.
//!
//! Flow for an end-user message: resolve or create the topic (greeting on creation), send the
//! text copy, record the correlation, forward the photo. For a staff message: map the topic
//! back to its user, look up the replied-to copy, deliver. Failures abandon the event; there
//! are no retries.

pub mod correlation;
pub mod directory;
pub mod error;
pub mod ids;
pub mod snapshot;
pub mod state;

pub use error::RelayError;
pub use ids::{ChatId, MessageId, TopicId, UserId};
pub use state::{RelayState, Resolved};

use crate::channels::{ForumManager, InboundEvent, MessageTransport, TransportError};
use crate::config::Placeholders;
use crate::routing::{self, Directive, IgnoreReason, Route};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Fixed inputs of the engine.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub shared_group: ChatId,
    pub greeting: String,
    pub topic_label_prefix: String,
    pub placeholders: Placeholders,
    /// Bound on every outbound call.
    pub timeout: Duration,
}

/// What happened to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// End-user message copied into its topic.
    Relayed {
        user: UserId,
        topic: TopicId,
        relayed: MessageId,
        created_topic: bool,
    },
    /// Staff message delivered to the topic's user.
    Delivered {
        user: UserId,
        message: MessageId,
        threaded: bool,
    },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Ignored(IgnoreReason),
    /// Topic has no directory entry (created out of band, or not ours).
    UnknownTopic(TopicId),
    NothingToDeliver,
}

pub struct Relay {
    settings: RelaySettings,
    state: Arc<RelayState>,
    forum: Arc<dyn ForumManager>,
    transport: Arc<dyn MessageTransport>,
}

impl Relay {
    pub fn new(
        settings: RelaySettings,
        state: Arc<RelayState>,
        forum: Arc<dyn ForumManager>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            settings,
            state,
            forum,
            transport,
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Process one event to completion.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Outcome, RelayError> {
        match routing::classify(event, self.settings.shared_group) {
            Route::FromUser { user } => self.relay_from_user(user, event).await,
            Route::FromStaff { topic } => self.deliver_to_user(topic, event).await,
            Route::Ignore(reason) => Ok(Outcome::Dropped(DropReason::Ignored(reason))),
        }
    }

    async fn relay_from_user(
        &self,
        user: UserId,
        event: &InboundEvent,
    ) -> Result<Outcome, RelayError> {
        let resolved = self
            .state
            .resolve_or_create(user, || self.create_topic(user))
            .await?;

        if resolved.created {
            if let Some(greeting) = routing::greeting(user, &self.settings.greeting) {
                if let Err(e) = self.execute(&greeting).await {
                    log::warn!("greeting to user {} not sent: {}", user, e);
                }
            }
        }

        let reply_anchor = match event.reply_to {
            Some(inbound) => self.state.relayed_for(user, inbound).await,
            None => None,
        };
        let plan = routing::plan_user_relay(
            event,
            self.settings.shared_group,
            resolved.topic,
            reply_anchor,
            &self.settings.placeholders,
        );

        let relayed = self.execute(&plan.text).await?;
        if let Err(e) = self.state.record(event.message_id, relayed, user).await {
            log::warn!("message {} of user {} not correlated: {}", event.message_id, user, e);
        }
        if let Some(photo) = &plan.photo {
            self.execute(photo).await?;
        }

        Ok(Outcome::Relayed {
            user,
            topic: resolved.topic,
            relayed,
            created_topic: resolved.created,
        })
    }

    async fn deliver_to_user(
        &self,
        topic: TopicId,
        event: &InboundEvent,
    ) -> Result<Outcome, RelayError> {
        let Some(user) = self.state.reverse_lookup(topic).await else {
            log::debug!("no user for topic {}, dropping", topic);
            return Ok(Outcome::Dropped(DropReason::UnknownTopic(topic)));
        };
        let correlation = match event.reply_to {
            Some(relayed) => self.state.resolve_by_relayed(relayed).await,
            None => None,
        };
        let Some(directive) = routing::plan_staff_reply(event, user, correlation) else {
            return Ok(Outcome::Dropped(DropReason::NothingToDeliver));
        };
        let threaded = matches!(
            directive,
            Directive::Text {
                reply_to: Some(_),
                ..
            }
        );
        let message = self.execute(&directive).await?;
        Ok(Outcome::Delivered {
            user,
            message,
            threaded,
        })
    }

    async fn create_topic(&self, user: UserId) -> Result<TopicId, RelayError> {
        let label = routing::topic_label(&self.settings.topic_label_prefix, user);
        log::info!("creating topic {:?} for user {}", label, user);
        self.bounded(
            "createForumTopic",
            self.forum.create_topic(self.settings.shared_group, &label),
        )
        .await
        .map_err(|e| RelayError::TopicCreationFailed {
            user,
            reason: e.to_string(),
        })
    }

    async fn execute(&self, directive: &Directive) -> Result<MessageId, RelayError> {
        match directive {
            Directive::Text { to, text, reply_to } => {
                self.bounded("sendMessage", self.transport.send_text(*to, text, *reply_to))
                    .await
            }
            Directive::Photo { to, photo, caption } => {
                self.bounded(
                    "sendPhoto",
                    self.transport.send_photo(*to, photo, caption.as_deref()),
                )
                .await
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, RelayError> {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RelayError::Timeout {
                operation,
                timeout: self.settings.timeout,
            }),
        }
    }
}
