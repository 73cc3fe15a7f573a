//! Correlation store: which relayed copy in the group belongs to which user message.
//!
//! The relayed id is the join key when staff reply to a copy. The inbound index is keyed by
//! `(user, inbound id)` because Telegram message ids are only unique per chat.
//! Nothing is ever evicted.

use crate::relay::ids::{MessageId, UserId};
use std::collections::HashMap;

/// One relayed end-user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub inbound: MessageId,
    pub relayed: MessageId,
    pub user: UserId,
}

/// Result of a successful `record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    AlreadyPresent,
}

/// A relayed id is already linked to a different user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("relayed message {relayed} already maps to user {existing_user} message {existing_inbound}")]
pub struct CorrelationConflict {
    pub relayed: MessageId,
    pub existing_user: UserId,
    pub existing_inbound: MessageId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationStore {
    by_relayed: HashMap<MessageId, (UserId, MessageId)>,
    by_inbound: HashMap<(UserId, MessageId), MessageId>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `inbound` (in `user`'s private chat) to its `relayed` copy.
    pub fn record(
        &mut self,
        inbound: MessageId,
        relayed: MessageId,
        user: UserId,
    ) -> Result<Recorded, CorrelationConflict> {
        if let Some(&(existing_user, existing_inbound)) = self.by_relayed.get(&relayed) {
            if existing_user == user && existing_inbound == inbound {
                return Ok(Recorded::AlreadyPresent);
            }
            return Err(CorrelationConflict {
                relayed,
                existing_user,
                existing_inbound,
            });
        }
        self.by_relayed.insert(relayed, (user, inbound));
        self.by_inbound.insert((user, inbound), relayed);
        Ok(Recorded::Inserted)
    }

    /// `(user, inbound id)` for a relayed copy, or `None` when the copy is not tracked.
    pub fn resolve_by_relayed(&self, relayed: MessageId) -> Option<(UserId, MessageId)> {
        self.by_relayed.get(&relayed).copied()
    }

    /// Latest relayed copy of a user's message.
    pub fn relayed_for(&self, user: UserId, inbound: MessageId) -> Option<MessageId> {
        self.by_inbound.get(&(user, inbound)).copied()
    }

    pub fn len(&self) -> usize {
        self.by_relayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_relayed.is_empty()
    }

    /// All entries, sorted by relayed id.
    pub fn entries(&self) -> Vec<CorrelationEntry> {
        let mut v: Vec<_> = self
            .by_relayed
            .iter()
            .map(|(relayed, (user, inbound))| CorrelationEntry {
                inbound: *inbound,
                relayed: *relayed,
                user: *user,
            })
            .collect();
        v.sort_by_key(|e| e.relayed);
        v
    }

    /// Inbound index pairs, sorted.
    pub fn inbound_pairs(&self) -> Vec<((UserId, MessageId), MessageId)> {
        let mut v: Vec<_> = self.by_inbound.iter().map(|(k, r)| (*k, *r)).collect();
        v.sort();
        v
    }
}
