//! Storage table with thread-safe access
//!
//! Entries live in a plain vector guarded by a single `RwLock` together with
//! the optional snapshot handle. Reads take the read side; a put holds the
//! write side for the in-memory upsert and the full snapshot rewrite.
//!
//! When the rewrite fails the in-memory change is already applied, so memory
//! and disk diverge until the next successful put. The error is still returned
//! to the caller.

use crate::config::StoreConfig;
use crate::error::{DistKvError, Result};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A single key-value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Trait defining the interface for key-value storage operations
pub trait Store: Send + Sync {
    /// Get the value stored for `key`, failing with `KeyNotFound`
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Insert or overwrite `key`
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Number of stored entries
    async fn len(&self) -> usize;

    /// Copy of every entry, in table order
    async fn entries(&self) -> Vec<Entry>;
}

struct TableInner {
    entries: Vec<Entry>,
    snapshot: Option<Snapshot>,
}

/// The storage table shared by every connection of a store
pub struct Table {
    inner: RwLock<TableInner>,
}

impl Table {
    /// Create an empty table that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(TableInner {
                entries: Vec::new(),
                snapshot: None,
            }),
        }
    }

    /// Create a table mirrored to the snapshot at `path`, loading what it holds
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (snapshot, entries) = Snapshot::open(path)?;
        info!(
            path = %snapshot.path().display(),
            entries = entries.len(),
            "Restored table from snapshot"
        );
        Ok(Self::from_snapshot(snapshot, entries))
    }

    fn from_snapshot(snapshot: Snapshot, entries: Vec<Entry>) -> Self {
        Self {
            inner: RwLock::new(TableInner {
                entries,
                snapshot: Some(snapshot),
            }),
        }
    }

    /// Build the table described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if config.persist {
            Self::with_snapshot(&config.snapshot_path)
        } else {
            Ok(Self::in_memory())
        }
    }

    pub async fn is_persistent(&self) -> bool {
        self.inner.read().await.snapshot.is_some()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store for Table {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.clone())
            .ok_or(DistKvError::KeyNotFound)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let TableInner { entries, snapshot } = &mut *inner;

        match entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => entry.value = value.to_vec(),
            None => entries.push(Entry::new(key.to_vec(), value.to_vec())),
        }

        if let Some(snapshot) = snapshot {
            snapshot.rewrite(entries)?;
            debug!(entries = entries.len(), "Rewrote snapshot");
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    async fn entries(&self) -> Vec<Entry> {
        self.inner.read().await.entries.clone()
    }
}
