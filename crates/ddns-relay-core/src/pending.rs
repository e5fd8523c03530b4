//! Pending update set
//!
//! The persisted map of record changes that have been accepted but not yet
//! applied at the provider, stored under `toUpdate/{hostname}/{type}`.
//!
//! - Last write wins: recording a value for an existing (hostname, type)
//!   replaces it in place
//! - Recording always enqueues a drain trigger in the same commit, so "work
//!   exists" and "a drain was signalled" never diverge
//! - Removal is conditioned on the versionstamp seen at snapshot time, so a
//!   value that changed mid-drain survives for the next drain

use crate::config::RecordType;
use crate::error::Result;
use crate::message::UpdateMessage;
use crate::occ::retry_on_conflict;
use crate::traits::{AtomicWrite, CommitOutcome, DurableStore, Entry, Key, Versionstamp};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// First key segment of every pending update
pub const PENDING_PREFIX: &str = "toUpdate";

/// Store key of the pending update for (hostname, type)
pub fn pending_key(hostname: &str, record_type: RecordType) -> Key {
    Key::new([PENDING_PREFIX, hostname, record_type.as_str()])
}

/// A desired record value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub hostname: String,
    pub record_type: RecordType,
    pub value: String,
}

impl PendingUpdate {
    pub fn new(
        hostname: impl Into<String>,
        record_type: RecordType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            record_type,
            value: value.into(),
        }
    }

    pub fn key(&self) -> Key {
        pending_key(&self.hostname, self.record_type)
    }

    fn from_entry(entry: &Entry) -> Option<Self> {
        let [prefix, hostname, record_type] = entry.key.segments() else {
            return None;
        };
        if prefix != PENDING_PREFIX {
            return None;
        }
        Some(Self {
            hostname: hostname.clone(),
            record_type: record_type.parse().ok()?,
            value: entry.value.as_ref()?.as_str()?.to_string(),
        })
    }
}

impl fmt::Display for PendingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) to {}", self.hostname, self.record_type, self.value)
    }
}

/// A pending update as read in a snapshot, with the stamp it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub update: PendingUpdate,
    pub versionstamp: Versionstamp,
}

/// Access to the pending update set
#[derive(Clone)]
pub struct PendingUpdateSet {
    store: Arc<dyn DurableStore>,
    conflict_retries: usize,
}

impl PendingUpdateSet {
    pub fn new(store: Arc<dyn DurableStore>, conflict_retries: usize) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    /// Write (or overwrite) a batch of updates and trigger a drain
    ///
    /// All writes and the `{attempt: 0, skip_lock: false}` trigger land in
    /// one commit.
    pub async fn record(&self, updates: &[PendingUpdate]) -> Result<()> {
        let keys: Vec<Key> = updates.iter().map(PendingUpdate::key).collect();
        let store = &self.store;
        let keys = &keys;

        retry_on_conflict("record pending updates", self.conflict_retries, move || async move {
            let current = store.get_many(keys).await?;

            let mut write = AtomicWrite::new();
            for entry in &current {
                write = write.check(entry);
            }
            for update in updates {
                write = write.set(update.key(), serde_json::Value::String(update.value.clone()));
            }
            write = write.enqueue(UpdateMessage::trigger().to_payload(), Duration::ZERO);

            Ok(match store.commit(write).await? {
                CommitOutcome::Committed(_) => Some(()),
                CommitOutcome::Conflict => None,
            })
        })
        .await?;

        debug!("Recorded {} pending update(s)", updates.len());
        Ok(())
    }

    /// Every pending update, in key order
    ///
    /// Entries that do not decode as a pending update are skipped.
    pub async fn snapshot(&self) -> Result<Vec<PendingEntry>> {
        let entries = self.store.list(&Key::new([PENDING_PREFIX])).await?;
        let mut snapshot = Vec::with_capacity(entries.len());

        for entry in &entries {
            match (PendingUpdate::from_entry(entry), entry.versionstamp) {
                (Some(update), Some(versionstamp)) => snapshot.push(PendingEntry {
                    update,
                    versionstamp,
                }),
                _ => warn!("Skipping malformed pending entry {}", entry.key),
            }
        }

        Ok(snapshot)
    }

    /// Delete an entry if it still carries its snapshot stamp
    ///
    /// Returns `Ok(false)` when the entry changed (or vanished) since the
    /// snapshot; the newer value is left for the next drain.
    pub async fn remove(&self, entry: &PendingEntry) -> Result<bool> {
        let key = entry.update.key();
        let write = AtomicWrite::new()
            .check_key(key.clone(), Some(entry.versionstamp))
            .delete(key);

        match self.store.commit(write).await? {
            CommitOutcome::Committed(_) => Ok(true),
            CommitOutcome::Conflict => {
                warn!(
                    "Pending entry {} changed during drain, keeping newer value",
                    entry.update.key()
                );
                Ok(false)
            }
        }
    }
}
