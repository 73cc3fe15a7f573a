//! Owner of the relay's mutable state: topic directory, correlation store and their snapshot.
//!
//! One async mutex guards both maps and the snapshot write, so every mutation is followed by
//! a full flush before the lock is released. Topic creation is additionally serialized per
//! user so two first-contact events from the same user cannot both create a topic.

use crate::relay::correlation::{CorrelationStore, Recorded};
use crate::relay::directory::TopicDirectory;
use crate::relay::error::RelayError;
use crate::relay::ids::{MessageId, TopicId, UserId};
use crate::relay::snapshot::{Snapshot, SnapshotStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of `resolve_or_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub topic: TopicId,
    /// True only for the call that actually created the topic.
    pub created: bool,
}

struct Inner {
    directory: TopicDirectory,
    correlations: CorrelationStore,
}

pub struct RelayState {
    inner: Mutex<Inner>,
    /// Per-user creation locks; entries exist only while a creation is in flight.
    creating: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
    /// None keeps state in memory only.
    store: Option<SnapshotStore>,
}

impl RelayState {
    pub fn in_memory() -> Self {
        Self::from_parts(TopicDirectory::new(), CorrelationStore::new(), None)
    }

    /// Load state from `store` (missing or corrupt file => empty) and persist into it from now on.
    pub async fn open(store: SnapshotStore) -> Self {
        let (directory, correlations) = store.load_or_empty().await.restore();
        log::info!(
            "relay state loaded from {}: {} topic(s), {} correlation(s)",
            store.path().display(),
            directory.len(),
            correlations.len()
        );
        Self::from_parts(directory, correlations, Some(store))
    }

    fn from_parts(
        directory: TopicDirectory,
        correlations: CorrelationStore,
        store: Option<SnapshotStore>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                directory,
                correlations,
            }),
            creating: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub async fn topic_for(&self, user: UserId) -> Option<TopicId> {
        self.inner.lock().await.directory.topic_for(user)
    }

    pub async fn reverse_lookup(&self, topic: TopicId) -> Option<UserId> {
        self.inner.lock().await.directory.reverse_lookup(topic)
    }

    pub async fn resolve_by_relayed(&self, relayed: MessageId) -> Option<(UserId, MessageId)> {
        self.inner.lock().await.correlations.resolve_by_relayed(relayed)
    }

    pub async fn relayed_for(&self, user: UserId, inbound: MessageId) -> Option<MessageId> {
        self.inner.lock().await.correlations.relayed_for(user, inbound)
    }

    /// (topics, correlations)
    pub async fn counts(&self) -> (usize, usize) {
        let g = self.inner.lock().await;
        (g.directory.len(), g.correlations.len())
    }

    /// Return the user's topic, calling `create` at most once per user to make one.
    ///
    /// `create` runs while holding only the user's creation lock, so other users and lookups
    /// are not blocked by the outbound call. When it fails nothing is recorded.
    pub async fn resolve_or_create<F, Fut>(
        &self,
        user: UserId,
        create: F,
    ) -> Result<Resolved, RelayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TopicId, RelayError>>,
    {
        if let Some(topic) = self.topic_for(user).await {
            return Ok(Resolved {
                topic,
                created: false,
            });
        }

        let lock = self.creating.lock().await.entry(user).or_default().clone();
        let guard = lock.lock().await;
        let result = self.create_locked(user, create).await;

        {
            let mut creating = self.creating.lock().await;
            // map + this call; anyone else holding a clone is still waiting on it
            if Arc::strong_count(&lock) == 2 {
                creating.remove(&user);
            }
        }
        drop(guard);
        result
    }

    async fn create_locked<F, Fut>(&self, user: UserId, create: F) -> Result<Resolved, RelayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TopicId, RelayError>>,
    {
        if let Some(topic) = self.topic_for(user).await {
            return Ok(Resolved {
                topic,
                created: false,
            });
        }

        let topic = create().await?;

        let mut g = self.inner.lock().await;
        g.directory
            .insert(user, topic)
            .map_err(|e| RelayError::TopicCreationFailed {
                user,
                reason: e.to_string(),
            })?;
        log::info!("topic {} created for user {}", topic, user);
        self.persist(&g).await;
        Ok(Resolved {
            topic,
            created: true,
        })
    }

    /// Link a relayed copy to the user message it came from and flush.
    pub async fn record(
        &self,
        inbound: MessageId,
        relayed: MessageId,
        user: UserId,
    ) -> Result<Recorded, RelayError> {
        let mut g = self.inner.lock().await;
        let recorded = g.correlations.record(inbound, relayed, user)?;
        if recorded == Recorded::Inserted {
            self.persist(&g).await;
        }
        Ok(recorded)
    }

    /// Flush while the caller still holds the state lock, so snapshots are written in order.
    /// A failed write is logged; the in-memory state stays authoritative.
    async fn persist(&self, g: &Inner) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = Snapshot::capture(&g.directory, &g.correlations);
        if let Err(e) = store.save(&snapshot).await {
            log::warn!("relay state not persisted: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn second_call_does_not_create_again() {
        let state = RelayState::in_memory();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let create = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RelayError>(TopicId(55))
        };

        let first = state.resolve_or_create(UserId(1), create).await.unwrap();
        let second = state.resolve_or_create(UserId(1), create).await.unwrap();
        assert_eq!(
            first,
            Resolved {
                topic: TopicId(55),
                created: true
            }
        );
        assert_eq!(
            second,
            Resolved {
                topic: TopicId(55),
                created: false
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_contact_creates_one_topic() {
        let state = Arc::new(RelayState::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                state
                    .resolve_or_create(UserId(9), || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) as i64;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, RelayError>(TopicId(100 + n))
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut results = Vec::new();
        for t in tasks {
            results.push(t.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.topic == TopicId(100)));
        assert_eq!(results.iter().filter(|r| r.created).count(), 1);
        assert!(state.creating.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_creation_records_nothing() {
        let state = RelayState::in_memory();
        let err = state
            .resolve_or_create(UserId(3), || async {
                Err::<TopicId, _>(RelayError::TopicCreationFailed {
                    user: UserId(3),
                    reason: "no thread id".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TopicCreationFailed { .. }));
        assert_eq!(state.counts().await, (0, 0));

        let ok = state
            .resolve_or_create(UserId(3), || async { Ok::<_, RelayError>(TopicId(8)) })
            .await
            .unwrap();
        assert!(ok.created);
    }

    #[tokio::test]
    async fn reused_topic_id_is_a_creation_failure() {
        let state = RelayState::in_memory();
        state
            .resolve_or_create(UserId(1), || async { Ok::<_, RelayError>(TopicId(8)) })
            .await
            .unwrap();
        let err = state
            .resolve_or_create(UserId(2), || async { Ok::<_, RelayError>(TopicId(8)) })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TopicCreationFailed { .. }));
        assert_eq!(state.reverse_lookup(TopicId(8)).await, Some(UserId(1)));
    }

    #[tokio::test]
    async fn record_rejects_conflicting_relayed_id() {
        let state = RelayState::in_memory();
        state
            .record(MessageId(1), MessageId(50), UserId(1))
            .await
            .unwrap();
        let err = state
            .record(MessageId(2), MessageId(50), UserId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CorrelationConflict(_)));
        assert_eq!(
            state.resolve_by_relayed(MessageId(50)).await,
            Some((UserId(1), MessageId(1)))
        );
    }

    #[tokio::test]
    async fn unwritable_snapshot_does_not_fail_mutations() {
        let dir = std::env::temp_dir().join(format!("forumrelay-state-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        // parent of the snapshot is a regular file, so every save fails
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let state = RelayState::open(SnapshotStore::new(blocker.join("state.json"))).await;

        let resolved = state
            .resolve_or_create(UserId(5), || async { Ok::<_, RelayError>(TopicId(50)) })
            .await
            .unwrap();
        assert!(resolved.created);
        assert_eq!(
            state
                .record(MessageId(1), MessageId(100), UserId(5))
                .await
                .unwrap(),
            Recorded::Inserted
        );
        assert_eq!(state.counts().await, (1, 1));
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let path = std::env::temp_dir()
            .join(format!("forumrelay-state-{}", uuid::Uuid::new_v4()))
            .join("state.json");
        {
            let state = RelayState::open(SnapshotStore::new(&path)).await;
            state
                .resolve_or_create(UserId(4), || async { Ok::<_, RelayError>(TopicId(40)) })
                .await
                .unwrap();
            state
                .record(MessageId(7), MessageId(700), UserId(4))
                .await
                .unwrap();
        }
        let reopened = RelayState::open(SnapshotStore::new(&path)).await;
        assert_eq!(reopened.topic_for(UserId(4)).await, Some(TopicId(40)));
        assert_eq!(reopened.reverse_lookup(TopicId(40)).await, Some(UserId(4)));
        assert_eq!(
            reopened.resolve_by_relayed(MessageId(700)).await,
            Some((UserId(4), MessageId(7)))
        );
    }
}
