//! Identifier newtypes shared by the relay core.
//!
//! All of them wrap the raw Telegram integers. They serialize as bare numbers so the
//! snapshot file stays a plain list of pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(
    /// End user (Telegram user id; equals the private chat id with the bot).
    UserId
);
id_newtype!(
    /// Forum topic inside the shared group (`message_thread_id`).
    TopicId
);
id_newtype!(
    /// Any Telegram chat (private chat or the shared supergroup).
    ChatId
);
id_newtype!(
    /// Message id. Only unique within the chat it was sent in.
    MessageId
);

impl From<UserId> for ChatId {
    fn from(u: UserId) -> Self {
        ChatId(u.0)
    }
}
