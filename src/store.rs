//! In-memory checkpoint store with lazy expiry
//!
//! Expired entries are never returned; they are evicted the next time a read
//! or a dump touches them. There is no background sweeper, so every read
//! takes `&mut self`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Trait defining the interface for checkpoint storage operations
pub trait Store: Send {
    /// Store `value` for `pipeline`, replacing any previous entry.
    fn set_checkpoint(&mut self, pipeline: String, value: String, ttl: Option<Duration>);

    /// Current value for `pipeline`, evicting it if it has expired.
    fn get_checkpoint(&mut self, pipeline: &str) -> Option<String>;

    /// Every live entry, used to build compaction snapshots.
    fn dump_checkpoints(&mut self) -> BTreeMap<String, String>;

    /// Number of entries held, including expired ones not yet evicted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last known position of one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub value: String,
    pub expires_at: Option<Instant>,
}

impl CheckpointEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// Single-owner in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, CheckpointEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn set_checkpoint(&mut self, pipeline: String, value: String, ttl: Option<Duration>) {
        // A ttl too large for the clock behaves like no ttl at all.
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .insert(pipeline, CheckpointEntry { value, expires_at });
    }

    fn get_checkpoint(&mut self, pipeline: &str) -> Option<String> {
        let entry = self.entries.get(pipeline)?;
        if entry.is_expired(Instant::now()) {
            self.entries.remove(pipeline);
            return None;
        }
        Some(entry.value.clone())
    }

    fn dump_checkpoints(&mut self) -> BTreeMap<String, String> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.entries
            .iter()
            .map(|(pipeline, entry)| (pipeline.clone(), entry.value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
