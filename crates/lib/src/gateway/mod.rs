//! Gateway: the HTTP side of the relay.
//!
//! One port serves the Telegram webhook and a health probe. Inbound events are queued and
//! handled by a single processor task.

mod server;

pub use server::{run_gateway, GatewayState};
