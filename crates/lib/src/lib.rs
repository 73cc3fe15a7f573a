//! forumrelay core library: relays private Telegram chats into per-user topics of one
//! forum group and threads staff replies back to the right user.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod relay;
pub mod routing;
