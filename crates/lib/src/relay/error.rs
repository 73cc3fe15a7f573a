//! Failures while handling one inbound event. None of them are retried.

use crate::channels::TransportError;
use crate::relay::correlation::CorrelationConflict;
use crate::relay::ids::UserId;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The forum did not give us a usable topic id. Nothing was recorded.
    #[error("creating topic for user {user} failed: {reason}")]
    TopicCreationFailed { user: UserId, reason: String },

    /// A send failed; the rest of the event's directives were skipped.
    #[error("transport failed: {0}")]
    TransportFailed(#[from] TransportError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("correlation anomaly: {0}")]
    CorrelationConflict(#[from] CorrelationConflict),
}
