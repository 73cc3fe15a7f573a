//! Topic directory: end user <-> forum topic, kept as a bijection.
//!
//! Forward: private message from a user is relayed into that user's topic.
//! Reverse: a staff message inside a topic is delivered back to the owning user.
//! Entries are only ever added; there is no topic-closing flow.

use crate::relay::ids::{TopicId, UserId};
use std::collections::HashMap;

/// Why a pair could not be added without breaking the bijection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryConflict {
    #[error("user {user} is already bound to topic {existing}")]
    UserBound { user: UserId, existing: TopicId },
    #[error("topic {topic} is already bound to user {existing}")]
    TopicBound { topic: TopicId, existing: UserId },
}

/// In-memory bidirectional map. Not synchronized; owned by `RelayState`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDirectory {
    /// user -> topic (inbound relay)
    to_topic: HashMap<UserId, TopicId>,
    /// topic -> user (staff reply delivery)
    to_user: HashMap<TopicId, UserId>,
}

impl TopicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic already assigned to `user`, if any.
    pub fn topic_for(&self, user: UserId) -> Option<TopicId> {
        self.to_topic.get(&user).copied()
    }

    /// Owner of `topic`. `None` means the topic is not ours and the event is dropped.
    pub fn reverse_lookup(&self, topic: TopicId) -> Option<UserId> {
        self.to_user.get(&topic).copied()
    }

    /// Record `user <-> topic` in both directions.
    ///
    /// Re-inserting an identical pair is a no-op. Any pair that would rebind an existing
    /// user or topic is rejected and the directory is left unchanged.
    pub fn insert(&mut self, user: UserId, topic: TopicId) -> Result<(), DirectoryConflict> {
        match (self.to_topic.get(&user), self.to_user.get(&topic)) {
            (Some(&t), Some(&u)) if t == topic && u == user => return Ok(()),
            (Some(&existing), _) => return Err(DirectoryConflict::UserBound { user, existing }),
            (_, Some(&existing)) => return Err(DirectoryConflict::TopicBound { topic, existing }),
            (None, None) => {}
        }
        self.to_topic.insert(user, topic);
        self.to_user.insert(topic, user);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.to_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_topic.is_empty()
    }

    /// Forward pairs, sorted by user for stable snapshots.
    pub fn user_topics(&self) -> Vec<(UserId, TopicId)> {
        let mut v: Vec<_> = self.to_topic.iter().map(|(u, t)| (*u, *t)).collect();
        v.sort();
        v
    }

    /// Reverse pairs, sorted by topic.
    pub fn topic_users(&self) -> Vec<(TopicId, UserId)> {
        let mut v: Vec<_> = self.to_user.iter().map(|(t, u)| (*t, *u)).collect();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_resolves_both_directions() {
        let mut d = TopicDirectory::new();
        d.insert(UserId(7), TopicId(101)).unwrap();
        assert_eq!(d.topic_for(UserId(7)), Some(TopicId(101)));
        assert_eq!(d.reverse_lookup(TopicId(101)), Some(UserId(7)));
        assert_eq!(d.reverse_lookup(TopicId(102)), None);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn identical_pair_is_idempotent() {
        let mut d = TopicDirectory::new();
        d.insert(UserId(7), TopicId(101)).unwrap();
        d.insert(UserId(7), TopicId(101)).unwrap();
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn rebinding_is_rejected_without_side_effects() {
        let mut d = TopicDirectory::new();
        d.insert(UserId(7), TopicId(101)).unwrap();
        let before = d.clone();

        let err = d.insert(UserId(7), TopicId(202)).unwrap_err();
        assert_eq!(
            err,
            DirectoryConflict::UserBound {
                user: UserId(7),
                existing: TopicId(101)
            }
        );
        let err = d.insert(UserId(8), TopicId(101)).unwrap_err();
        assert!(matches!(err, DirectoryConflict::TopicBound { .. }));
        assert_eq!(d, before);
    }
}
