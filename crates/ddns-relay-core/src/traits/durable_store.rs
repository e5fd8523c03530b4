// # Durable Store Trait
//
// Defines the interface for the transactional key-value store and delayed
// task queue the relay coordinates through.
//
// ## Purpose
//
// All shared relay state (pending updates, run lock flags) lives behind this
// trait and is only ever mutated through conditional multi-key commits. The
// store is the relay's sole concurrency-control mechanism: there is no
// separate lock manager.
//
// ## Consistency Contract
//
// - Every committed write carries a fresh, strictly increasing versionstamp
// - `commit` applies all mutations and enqueues of a write, or none of them
// - A check on a key passes only if the key's current versionstamp equals the
//   expected one (`None` expects the key to be absent)
// - Queue delivery is at-least-once: a message stays in the store until it
//   is acknowledged, and is redelivered after `nack` or a restart
//
// ## Implementations
//
// - Memory: `MemoryStore` (tests, ephemeral deployments)
// - File: `FileStore` (JSON file with atomic replace and backup recovery)
//
// ## Usage
//
// ```rust,ignore
// use ddns_relay_core::traits::{AtomicWrite, DurableStore, Key};
//
// let entry = store.get(&Key::from(["queue", "locked"])).await?;
// let write = AtomicWrite::new()
//     .check(&entry)
//     .set(entry.key.clone(), serde_json::json!(true));
// if store.commit(write).await?.is_committed() {
//     // we won the race
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Store key: an ordered list of string segments
///
/// Keys order segment by segment, which is also the scan order of
/// [`DurableStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub Vec<String>);

impl Key {
    /// Build a key from segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Key segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` is a (non-strict) prefix of this key
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(segments: [&str; N]) -> Self {
        Key::new(segments)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Opaque version of a stored value
///
/// Every commit produces a new, larger versionstamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Versionstamp(pub u64);

/// A point-read result
///
/// Absent keys read as `value == None` and `versionstamp == None`; checking
/// such an entry asserts that the key is still absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<serde_json::Value>,
    pub versionstamp: Option<Versionstamp>,
}

impl Entry {
    /// Read the value as a boolean flag (absent or non-boolean reads as `false`)
    pub fn as_flag(&self) -> bool {
        self.value
            .as_ref()
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Versionstamp expectation for one key
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub key: Key,
    pub versionstamp: Option<Versionstamp>,
}

/// A single mutation within an atomic write
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(Key, serde_json::Value),
    Delete(Key),
}

/// A message to enqueue as part of an atomic write
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueue {
    pub payload: serde_json::Value,
    pub delay: Duration,
}

/// Builder for a conditional multi-key commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicWrite {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
    pub enqueues: Vec<Enqueue>,
}

impl AtomicWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the entry's key to still carry the versionstamp it was read with
    pub fn check(mut self, entry: &Entry) -> Self {
        self.checks.push(Check {
            key: entry.key.clone(),
            versionstamp: entry.versionstamp,
        });
        self
    }

    /// Require `key` to carry exactly `versionstamp`
    pub fn check_key(mut self, key: Key, versionstamp: Option<Versionstamp>) -> Self {
        self.checks.push(Check { key, versionstamp });
        self
    }

    pub fn set(mut self, key: Key, value: serde_json::Value) -> Self {
        self.mutations.push(Mutation::Set(key, value));
        self
    }

    pub fn delete(mut self, key: Key) -> Self {
        self.mutations.push(Mutation::Delete(key));
        self
    }

    /// Enqueue `payload`, deliverable once `delay` has elapsed after commit
    pub fn enqueue(mut self, payload: serde_json::Value, delay: Duration) -> Self {
        self.enqueues.push(Enqueue { payload, delay });
        self
    }
}

/// Result of [`DurableStore::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All checks passed; the write was applied under this versionstamp
    Committed(Versionstamp),
    /// A check failed; nothing was applied
    Conflict,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// Queue message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One in-flight queue message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: MessageId,
    pub payload: serde_json::Value,
    /// How many times this message has been handed out, including this time
    pub deliveries: u32,
}

/// Trait for durable store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks; the
/// dispatcher runs several coordinator invocations against one store.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Implement locking internally to make `commit` atomic
///
/// ## Forbidden Capabilities
/// - ❌ Interpret keys or values (owned by the Pending Update Set and Run Lock)
/// - ❌ Drop unacknowledged messages
/// - ❌ Reorder or merge the mutations of a write
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read one key
    async fn get(&self, key: &Key) -> Result<Entry, crate::Error>;

    /// Read several keys, in the order given
    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, crate::Error>;

    /// All existing entries under `prefix`, in key order
    async fn list(&self, prefix: &Key) -> Result<Vec<Entry>, crate::Error>;

    /// Apply a conditional multi-key write
    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, crate::Error>;

    /// Wait for the next due, not-in-flight message and mark it in flight
    async fn receive(&self) -> Result<Delivery, crate::Error>;

    /// Remove a delivered message permanently
    async fn ack(&self, id: MessageId) -> Result<(), crate::Error>;

    /// Return a delivered message to the queue, due again after `delay`
    async fn nack(&self, id: MessageId, delay: Duration) -> Result<(), crate::Error>;

    /// Persist any buffered changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
