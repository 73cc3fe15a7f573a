//! Communication channels (Telegram).
//!
//! Inbound side: Telegram updates become `InboundEvent`s for the relay.
//! Outbound side: `ForumManager` and `MessageTransport` are what the relay calls.

mod inbound;
mod telegram;
mod transport;

pub use inbound::{InboundEvent, Origin};
pub use telegram::{TelegramChannel, TelegramError, TelegramMessage, TelegramUpdate, TELEGRAM_API_BASE};
pub use transport::{Destination, ForumManager, MessageTransport, TransportError};
