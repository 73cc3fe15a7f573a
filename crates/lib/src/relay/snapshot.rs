//! Persistence of the relay state as one JSON file.
//!
//! The file holds four independent lists of pairs (user->topic, topic->user,
//! inbound->relayed, relayed->inbound). It is read once at startup and rewritten in full
//! after every mutation via temp file + rename, so a crash never leaves half a file behind.

use crate::relay::correlation::CorrelationStore;
use crate::relay::directory::TopicDirectory;
use crate::relay::ids::{MessageId, TopicId, UserId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialized form of the directory and correlation store. Order inside the lists is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub user_topics: Vec<(UserId, TopicId)>,
    #[serde(default)]
    pub topic_users: Vec<(TopicId, UserId)>,
    #[serde(default)]
    pub inbound_relayed: Vec<((UserId, MessageId), MessageId)>,
    #[serde(default)]
    pub relayed_inbound: Vec<(MessageId, (UserId, MessageId))>,
}

impl Snapshot {
    pub fn capture(directory: &TopicDirectory, correlations: &CorrelationStore) -> Self {
        Self {
            user_topics: directory.user_topics(),
            topic_users: directory.topic_users(),
            inbound_relayed: correlations.inbound_pairs(),
            relayed_inbound: correlations
                .entries()
                .into_iter()
                .map(|e| (e.relayed, (e.user, e.inbound)))
                .collect(),
        }
    }

    /// Rebuild in-memory state. Pairs that would break the bijection or remap a relayed id
    /// are skipped with a warning; everything else is kept.
    pub fn restore(&self) -> (TopicDirectory, CorrelationStore) {
        let mut directory = TopicDirectory::new();
        let forward = self.user_topics.iter().copied();
        let reverse = self.topic_users.iter().map(|&(t, u)| (u, t));
        for (user, topic) in forward.chain(reverse) {
            if let Err(e) = directory.insert(user, topic) {
                log::warn!("snapshot: skipping directory pair {} -> {}: {}", user, topic, e);
            }
        }

        let mut correlations = CorrelationStore::new();
        let by_relayed = self
            .relayed_inbound
            .iter()
            .map(|&(relayed, (user, inbound))| (inbound, relayed, user));
        let by_inbound = self
            .inbound_relayed
            .iter()
            .map(|&((user, inbound), relayed)| (inbound, relayed, user));
        for (inbound, relayed, user) in by_relayed.chain(by_inbound) {
            if let Err(e) = correlations.record(inbound, relayed, user) {
                log::warn!("snapshot: skipping correlation: {}", e);
            }
        }
        (directory, correlations)
    }
}

/// File location of the snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<file><suffix>` next to the snapshot.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Where an unreadable snapshot is moved before starting empty.
    pub fn corrupt_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    /// Read the snapshot. A missing file is an empty snapshot.
    pub async fn load(&self) -> Result<Snapshot, SnapshotError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no snapshot at {}, starting empty", self.path.display());
                return Ok(Snapshot::default());
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&data).map_err(|source| SnapshotError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Like `load`, but any failure is logged and yields an empty snapshot.
    ///
    /// A corrupt file is renamed to `corrupt_path()` first, so the next save does not
    /// overwrite what an operator might still recover from it.
    pub async fn load_or_empty(&self) -> Snapshot {
        match self.load().await {
            Ok(s) => s,
            Err(e @ SnapshotError::Corrupt { .. }) => {
                let aside = self.corrupt_path();
                match tokio::fs::rename(&self.path, &aside).await {
                    Ok(()) => log::warn!(
                        "{}; moved it to {}, starting with empty relay state",
                        e,
                        aside.display()
                    ),
                    Err(mv) => log::warn!(
                        "{}; could not move it aside ({}), starting with empty relay state",
                        e,
                        mv
                    ),
                }
                Snapshot::default()
            }
            Err(e) => {
                log::warn!("{}; starting with empty relay state", e);
                Snapshot::default()
            }
        }
    }

    /// Replace the file with `snapshot`: write and sync a sibling temp file, then rename over.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let io_err = |source: std::io::Error| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(snapshot).map_err(SnapshotError::Encode)?;
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(&json).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        // the rename itself is only durable once the directory entry is flushed
        #[cfg(unix)]
        {
            let dir = tokio::fs::File::open(parent.unwrap_or_else(|| Path::new(".")))
                .await
                .map_err(io_err)?;
            dir.sync_all().await.map_err(io_err)?;
        }
        Ok(())
    }
}
