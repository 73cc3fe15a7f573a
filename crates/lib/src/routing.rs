//! Relay routing: decides, for one inbound event, where it goes and with what reply linkage.
//!
//! Everything here is pure. Lookups happen in the caller (`relay::Relay`), which passes in
//! the resolved topic, user and correlation and then executes the returned directives.

use crate::channels::{Destination, InboundEvent, Origin};
use crate::config::Placeholders;
use crate::relay::ids::{ChatId, MessageId, TopicId, UserId};

/// Which flow an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// End user -> shared group.
    FromUser { user: UserId },
    /// Staff in a topic of the shared group -> end user.
    FromStaff { topic: TopicId },
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by a bot; relaying it would loop our own copies back.
    BotAuthor,
    /// A group other than the configured shared group.
    ForeignGroup,
    /// Shared group message outside any topic.
    NoTopic,
    UnsupportedChat,
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Text {
        to: Destination,
        text: String,
        reply_to: Option<MessageId>,
    },
    Photo {
        to: Destination,
        photo: String,
        caption: Option<String>,
    },
}

/// Directives for an end-user message. `text` is always sent first; its result is what gets
/// correlated. `photo` is only sent if `text` went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRelayPlan {
    pub text: Directive,
    pub photo: Option<Directive>,
}

pub fn classify(event: &InboundEvent, shared_group: ChatId) -> Route {
    match event.origin {
        Origin::Direct => Route::FromUser { user: event.sender },
        Origin::Group => {
            if event.chat != shared_group {
                return Route::Ignore(IgnoreReason::ForeignGroup);
            }
            let Some(topic) = event.topic else {
                return Route::Ignore(IgnoreReason::NoTopic);
            };
            if event.sender_is_bot {
                return Route::Ignore(IgnoreReason::BotAuthor);
            }
            Route::FromStaff { topic }
        }
        Origin::Other => Route::Ignore(IgnoreReason::UnsupportedChat),
    }
}

/// Label of a user's topic; derived from the user id only, so it is stable across restarts.
pub fn topic_label(prefix: &str, user: UserId) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        user.to_string()
    } else {
        format!("{} {}", prefix, user)
    }
}

/// One-time greeting to a first-contact user. `None` when greetings are disabled.
pub fn greeting(user: UserId, text: &str) -> Option<Directive> {
    if text.trim().is_empty() {
        return None;
    }
    Some(Directive::Text {
        to: Destination::chat(user),
        text: text.to_string(),
        reply_to: None,
    })
}

/// Text shown in the topic: the message text, otherwise a placeholder for the attachment
/// kind followed by the caption.
pub fn display_text(event: &InboundEvent, placeholders: &Placeholders) -> String {
    if let Some(text) = &event.text {
        return text.clone();
    }
    let placeholder = if event.photo.is_some() {
        &placeholders.photo
    } else if event.has_document {
        &placeholders.document
    } else {
        &placeholders.other
    };
    match &event.caption {
        Some(c) => format!("{}\n{}", placeholder, c),
        None => placeholder.clone(),
    }
}

/// Plan the copy of an end-user message into `topic`.
///
/// `reply_anchor` is the relayed copy of the message the user replied to, if known.
/// Documents are represented by their placeholder only; photos are also forwarded.
pub fn plan_user_relay(
    event: &InboundEvent,
    shared_group: ChatId,
    topic: TopicId,
    reply_anchor: Option<MessageId>,
    placeholders: &Placeholders,
) -> UserRelayPlan {
    let to = Destination::topic(shared_group, topic);
    UserRelayPlan {
        text: Directive::Text {
            to,
            text: display_text(event, placeholders),
            reply_to: reply_anchor,
        },
        photo: event.photo.as_ref().map(|p| Directive::Photo {
            to,
            photo: p.clone(),
            caption: None,
        }),
    }
}

/// Plan delivery of a staff message to `user`, the owner of the topic it was posted in.
///
/// A photo wins over text. Text is threaded on the user's original message when the staff
/// member replied to a tracked copy of it; photos are never threaded.
/// `None` when there is nothing deliverable (stickers, documents, service messages).
pub fn plan_staff_reply(
    event: &InboundEvent,
    user: UserId,
    correlation: Option<(UserId, MessageId)>,
) -> Option<Directive> {
    let to = Destination::chat(user);
    if let Some(photo) = &event.photo {
        return Some(Directive::Photo {
            to,
            photo: photo.clone(),
            caption: event.caption.clone(),
        });
    }
    let text = event.text.as_ref()?;
    let reply_to = match correlation {
        Some((owner, inbound)) if owner == user => Some(inbound),
        Some((owner, _)) => {
            log::warn!(
                "reply in topic of user {} references a message of user {}; delivering unthreaded",
                user,
                owner
            );
            None
        }
        None => None,
    };
    Some(Directive::Text {
        to,
        text: text.clone(),
        reply_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: ChatId = ChatId(-1001);

    fn placeholders() -> Placeholders {
        Placeholders::default()
    }

    fn user_event(text: Option<&str>) -> InboundEvent {
        InboundEvent {
            origin: Origin::Direct,
            chat: ChatId(42),
            message_id: MessageId(5),
            sender: UserId(42),
            sender_is_bot: false,
            topic: None,
            text: text.map(String::from),
            caption: None,
            photo: None,
            has_document: false,
            reply_to: None,
        }
    }

    fn staff_event(topic: i64, text: Option<&str>) -> InboundEvent {
        InboundEvent {
            origin: Origin::Group,
            chat: GROUP,
            message_id: MessageId(800),
            sender: UserId(7),
            sender_is_bot: false,
            topic: Some(TopicId(topic)),
            text: text.map(String::from),
            caption: None,
            photo: None,
            has_document: false,
            reply_to: None,
        }
    }

    #[test]
    fn classify_private_chat_as_user_flow() {
        assert_eq!(
            classify(&user_event(Some("hi")), GROUP),
            Route::FromUser { user: UserId(42) }
        );
    }

    #[test]
    fn classify_shared_group_topic_as_staff_flow() {
        assert_eq!(
            classify(&staff_event(12, Some("hi")), GROUP),
            Route::FromStaff { topic: TopicId(12) }
        );
    }

    #[test]
    fn classify_drops_bot_authored_group_messages() {
        let mut ev = staff_event(12, Some("echo"));
        ev.sender_is_bot = true;
        assert_eq!(classify(&ev, GROUP), Route::Ignore(IgnoreReason::BotAuthor));
    }

    #[test]
    fn classify_drops_other_groups_and_topicless_messages() {
        let mut foreign = staff_event(12, Some("hi"));
        foreign.chat = ChatId(-2002);
        assert_eq!(
            classify(&foreign, GROUP),
            Route::Ignore(IgnoreReason::ForeignGroup)
        );

        let mut general = staff_event(12, Some("hi"));
        general.topic = None;
        assert_eq!(classify(&general, GROUP), Route::Ignore(IgnoreReason::NoTopic));
    }

    #[test]
    fn topic_label_is_deterministic() {
        assert_eq!(topic_label("Customer", UserId(42)), "Customer 42");
        assert_eq!(topic_label("  ", UserId(42)), "42");
    }

    #[test]
    fn greeting_disabled_when_empty() {
        assert!(greeting(UserId(1), "  ").is_none());
        assert_eq!(
            greeting(UserId(1), "hello"),
            Some(Directive::Text {
                to: Destination::chat(UserId(1)),
                text: "hello".into(),
                reply_to: None
            })
        );
    }

    #[test]
    fn plain_text_is_relayed_into_topic_without_photo() {
        let plan = plan_user_relay(
            &user_event(Some("hello")),
            GROUP,
            TopicId(12),
            None,
            &placeholders(),
        );
        assert_eq!(
            plan.text,
            Directive::Text {
                to: Destination::topic(GROUP, TopicId(12)),
                text: "hello".into(),
                reply_to: None
            }
        );
        assert!(plan.photo.is_none());
    }

    #[test]
    fn photo_is_placeholder_then_forward() {
        let mut ev = user_event(None);
        ev.photo = Some("big".into());
        let plan = plan_user_relay(&ev, GROUP, TopicId(12), None, &placeholders());
        let Directive::Text { text, .. } = &plan.text else {
            panic!("expected text directive");
        };
        assert_eq!(text, &placeholders().photo);
        assert_eq!(
            plan.photo,
            Some(Directive::Photo {
                to: Destination::topic(GROUP, TopicId(12)),
                photo: "big".into(),
                caption: None
            })
        );
    }

    #[test]
    fn document_is_placeholder_only_with_caption() {
        let mut ev = user_event(None);
        ev.has_document = true;
        ev.caption = Some("invoice".into());
        let plan = plan_user_relay(&ev, GROUP, TopicId(12), None, &placeholders());
        let Directive::Text { text, .. } = &plan.text else {
            panic!("expected text directive");
        };
        assert_eq!(text, &format!("{}\ninvoice", placeholders().document));
        assert!(plan.photo.is_none());
    }

    #[test]
    fn unknown_content_gets_generic_placeholder() {
        let ev = user_event(None);
        assert_eq!(display_text(&ev, &placeholders()), placeholders().other);
    }

    #[test]
    fn user_reply_is_threaded_on_relayed_copy() {
        let plan = plan_user_relay(
            &user_event(Some("as I said")),
            GROUP,
            TopicId(12),
            Some(MessageId(300)),
            &placeholders(),
        );
        assert!(matches!(
            plan.text,
            Directive::Text {
                reply_to: Some(MessageId(300)),
                ..
            }
        ));
    }

    #[test]
    fn staff_reply_to_tracked_copy_is_threaded() {
        let d = plan_staff_reply(
            &staff_event(12, Some("hi there")),
            UserId(42),
            Some((UserId(42), MessageId(5))),
        );
        assert_eq!(
            d,
            Some(Directive::Text {
                to: Destination::chat(UserId(42)),
                text: "hi there".into(),
                reply_to: Some(MessageId(5))
            })
        );
    }

    #[test]
    fn staff_message_without_correlation_is_plain() {
        let d = plan_staff_reply(&staff_event(12, Some("ping")), UserId(42), None);
        assert!(matches!(d, Some(Directive::Text { reply_to: None, .. })));
    }

    #[test]
    fn correlation_of_another_user_is_not_used() {
        let d = plan_staff_reply(
            &staff_event(12, Some("ping")),
            UserId(42),
            Some((UserId(43), MessageId(5))),
        );
        assert!(matches!(d, Some(Directive::Text { reply_to: None, .. })));
    }

    #[test]
    fn staff_photo_beats_text_and_is_not_threaded() {
        let mut ev = staff_event(12, Some("text too"));
        ev.photo = Some("pic".into());
        ev.caption = Some("see".into());
        let d = plan_staff_reply(&ev, UserId(42), Some((UserId(42), MessageId(5))));
        assert_eq!(
            d,
            Some(Directive::Photo {
                to: Destination::chat(UserId(42)),
                photo: "pic".into(),
                caption: Some("see".into())
            })
        );
    }

    #[test]
    fn staff_sticker_has_nothing_to_deliver() {
        assert_eq!(plan_staff_reply(&staff_event(12, None), UserId(42), None), None);
    }
}
