//! Run lock
//!
//! Two persisted flags keep at most one drain active:
//!
//! | `locked` | `queued` | state                  |
//! |----------|----------|------------------------|
//! | false    | -        | `Idle`                 |
//! | true     | false    | `Running`              |
//! | true     | true     | `RunningWithPending`   |
//!
//! A trigger that finds the lock held sets `queued` and leaves; the holder
//! re-arms itself on release. Drains with `skip_lock` continue the run that
//! holds the lock and always proceed.
//!
//! There is no lease: a drain that fails without releasing leaves the lock
//! held. `queue/heartbeat` records when the holder last made progress so
//! that the watchdog can alert on it.

use crate::error::Result;
use crate::message::UpdateMessage;
use crate::occ::retry_on_conflict;
use crate::pending::{PendingEntry, PendingUpdateSet};
use crate::traits::{AtomicWrite, CommitOutcome, DurableStore, Entry, Key};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn locked_key() -> Key {
    Key::from(["queue", "locked"])
}

fn queued_key() -> Key {
    Key::from(["queue", "queued"])
}

fn heartbeat_key() -> Key {
    Key::from(["queue", "heartbeat"])
}

fn heartbeat_value(now: DateTime<Utc>) -> serde_json::Value {
    serde_json::Value::String(now.to_rfc3339())
}

/// Lock state derived from the two flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Running,
    RunningWithPending,
}

impl LockState {
    fn from_flags(locked: bool, queued: bool) -> Self {
        match (locked, queued) {
            (false, _) => LockState::Idle,
            (true, false) => LockState::Running,
            (true, true) => LockState::RunningWithPending,
        }
    }
}

/// Current lock state with the holder's last heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub state: LockState,
    pub heartbeat: Option<DateTime<Utc>>,
}

/// Result of [`RunLock::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Lock was held; the request was folded into the next drain
    Coalesced,
    /// Lock taken; the pending snapshot to drain
    Acquired(Vec<PendingEntry>),
}

/// Result of [`RunLock::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// No work arrived during the run; lock cleared
    Unlocked,
    /// Work arrived during the run; a follow-up drain was enqueued and the
    /// lock stays held for it
    Rearmed,
}

/// Single-flight lock over the durable store
#[derive(Clone)]
pub struct RunLock {
    store: Arc<dyn DurableStore>,
    conflict_retries: usize,
}

impl RunLock {
    pub fn new(store: Arc<dyn DurableStore>, conflict_retries: usize) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    /// Take the lock and snapshot the pending set, or coalesce
    ///
    /// The flags are checked against the stamps they were read with, so of
    /// several racing triggers only one takes each snapshot.
    pub async fn acquire(
        &self,
        pending: &PendingUpdateSet,
        skip_lock: bool,
    ) -> Result<Acquisition> {
        let store = &self.store;

        let acquisition = retry_on_conflict(
            "acquire run lock",
            self.conflict_retries,
            move || async move {
                let flags = store.get_many(&[locked_key(), queued_key()]).await?;
                let (locked, queued) = (&flags[0], &flags[1]);

                let write = AtomicWrite::new().check(locked).check(queued);
                let (write, acquisition) = if locked.as_flag() && !skip_lock {
                    (
                        write.set(queued_key(), serde_json::Value::Bool(true)),
                        Acquisition::Coalesced,
                    )
                } else {
                    let snapshot = pending.snapshot().await?;
                    (
                        write
                            .set(queued_key(), serde_json::Value::Bool(false))
                            .set(locked_key(), serde_json::Value::Bool(true))
                            .set(heartbeat_key(), heartbeat_value(Utc::now())),
                        Acquisition::Acquired(snapshot),
                    )
                };

                Ok(match store.commit(write).await? {
                    CommitOutcome::Committed(_) => Some(acquisition),
                    CommitOutcome::Conflict => None,
                })
            },
        )
        .await?;

        match &acquisition {
            Acquisition::Coalesced => info!("Run lock held, drain request coalesced"),
            Acquisition::Acquired(snapshot) => info!(
                "Run lock acquired (skip_lock={}), {} pending update(s)",
                skip_lock,
                snapshot.len()
            ),
        }
        Ok(acquisition)
    }

    /// Release the lock at the end of a run, or re-arm if work is queued
    pub async fn release(&self) -> Result<Release> {
        let store = &self.store;

        let release = retry_on_conflict(
            "release run lock",
            self.conflict_retries,
            move || async move {
                let queued = store.get(&queued_key()).await?;

                let write = AtomicWrite::new().check(&queued);
                let (write, release) = if queued.as_flag() {
                    (
                        write.enqueue(UpdateMessage::rearm().to_payload(), Duration::ZERO),
                        Release::Rearmed,
                    )
                } else {
                    (
                        write.set(locked_key(), serde_json::Value::Bool(false)),
                        Release::Unlocked,
                    )
                };

                Ok(match store.commit(write).await? {
                    CommitOutcome::Committed(_) => Some(release),
                    CommitOutcome::Conflict => None,
                })
            },
        )
        .await?;

        match release {
            Release::Unlocked => info!("Run lock released"),
            Release::Rearmed => info!("Work queued during run, follow-up drain enqueued"),
        }
        Ok(release)
    }

    /// Enqueue a retry drain that continues the current run
    ///
    /// The lock stays held; the heartbeat is refreshed in the same commit.
    pub async fn schedule_retry(&self, message: UpdateMessage, delay: Duration) -> Result<()> {
        let store = &self.store;

        retry_on_conflict("schedule retry drain", self.conflict_retries, move || async move {
            let locked = store.get(&locked_key()).await?;
            if !locked.as_flag() {
                warn!("Scheduling a retry drain while the run lock is not held");
            }

            let write = AtomicWrite::new()
                .check(&locked)
                .set(heartbeat_key(), heartbeat_value(Utc::now()))
                .enqueue(message.to_payload(), delay);

            Ok(match store.commit(write).await? {
                CommitOutcome::Committed(_) => Some(()),
                CommitOutcome::Conflict => None,
            })
        })
        .await?;

        debug!(
            "Retry drain attempt {} scheduled in {}s",
            message.attempt,
            delay.as_secs()
        );
        Ok(())
    }

    /// Refresh the heartbeat of a drain that is still making progress
    ///
    /// Returns false without writing when the lock is not held.
    pub async fn refresh_heartbeat(&self) -> Result<bool> {
        let store = &self.store;

        let refreshed = retry_on_conflict(
            "refresh lock heartbeat",
            self.conflict_retries,
            move || async move {
                let locked = store.get(&locked_key()).await?;
                if !locked.as_flag() {
                    return Ok(Some(false));
                }

                let write = AtomicWrite::new()
                    .check(&locked)
                    .set(heartbeat_key(), heartbeat_value(Utc::now()));

                Ok(match store.commit(write).await? {
                    CommitOutcome::Committed(_) => Some(true),
                    CommitOutcome::Conflict => None,
                })
            },
        )
        .await?;

        if !refreshed {
            warn!("Run lock not held, heartbeat not refreshed");
        }
        Ok(refreshed)
    }

    /// Read the current lock state and heartbeat
    pub async fn status(&self) -> Result<LockStatus> {
        let entries = self
            .store
            .get_many(&[locked_key(), queued_key(), heartbeat_key()])
            .await?;

        Ok(LockStatus {
            state: LockState::from_flags(entries[0].as_flag(), entries[1].as_flag()),
            heartbeat: parse_heartbeat(&entries[2]),
        })
    }
}

fn parse_heartbeat(entry: &Entry) -> Option<DateTime<Utc>> {
    let text = entry.value.as_ref()?.as_str()?;
    match DateTime::parse_from_rfc3339(text) {
        Ok(at) => Some(at.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring unreadable lock heartbeat {:?}: {}", text, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordType;
    use crate::pending::PendingUpdate;
    use crate::state::MemoryStore;

    fn setup() -> (MemoryStore, PendingUpdateSet, RunLock) {
        let store = MemoryStore::new();
        let shared: Arc<dyn DurableStore> = Arc::new(store.clone());
        (
            store,
            PendingUpdateSet::new(shared.clone(), 8),
            RunLock::new(shared, 8),
        )
    }

    #[tokio::test]
    async fn acquire_then_coalesce_then_rearm() {
        let (store, pending, lock) = setup();
        pending
            .record(&[PendingUpdate::new("a.example.com", RecordType::A, "1.1.1.1")])
            .await
            .unwrap();
        store.clear_queue().await;

        let first = lock.acquire(&pending, false).await.unwrap();
        assert!(matches!(first, Acquisition::Acquired(ref s) if s.len() == 1));
        assert_eq!(lock.status().await.unwrap().state, LockState::Running);

        assert_eq!(lock.acquire(&pending, false).await.unwrap(), Acquisition::Coalesced);
        assert_eq!(lock.acquire(&pending, false).await.unwrap(), Acquisition::Coalesced);
        assert_eq!(
            lock.status().await.unwrap().state,
            LockState::RunningWithPending
        );

        assert_eq!(lock.release().await.unwrap(), Release::Rearmed);
        let queued = store.queued_messages().await;
        assert_eq!(queued.len(), 1, "two coalesced triggers yield one follow-up");
        assert_eq!(queued[0].payload, UpdateMessage::rearm().to_payload());

        // The follow-up drain skips the lock and clears `queued`
        let again = lock.acquire(&pending, true).await.unwrap();
        assert!(matches!(again, Acquisition::Acquired(_)));
        assert_eq!(lock.status().await.unwrap().state, LockState::Running);
        assert_eq!(lock.release().await.unwrap(), Release::Unlocked);
        assert_eq!(lock.status().await.unwrap().state, LockState::Idle);
    }

    #[tokio::test]
    async fn skip_lock_proceeds_while_locked() {
        let (_store, pending, lock) = setup();
        lock.acquire(&pending, false).await.unwrap();

        let retry = lock.acquire(&pending, true).await.unwrap();
        assert_eq!(retry, Acquisition::Acquired(Vec::new()));
    }

    #[tokio::test]
    async fn acquire_and_retry_write_heartbeat() {
        let (store, pending, lock) = setup();
        assert_eq!(lock.status().await.unwrap().heartbeat, None);

        lock.acquire(&pending, false).await.unwrap();
        let first = lock.status().await.unwrap().heartbeat.unwrap();
        assert!(Utc::now() - first < chrono::Duration::seconds(5));

        lock.schedule_retry(UpdateMessage::retry(1), Duration::from_secs(10))
            .await
            .unwrap();
        let second = lock.status().await.unwrap().heartbeat.unwrap();
        assert!(second >= first);

        let queued = store.queued_messages().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload, UpdateMessage::retry(1).to_payload());
        assert_eq!(lock.status().await.unwrap().state, LockState::Running);
    }

    #[tokio::test]
    async fn refresh_heartbeat_only_while_locked() {
        let (_store, pending, lock) = setup();
        assert!(!lock.refresh_heartbeat().await.unwrap());
        assert_eq!(lock.status().await.unwrap().heartbeat, None);

        lock.acquire(&pending, false).await.unwrap();
        let acquired = lock.status().await.unwrap().heartbeat.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(lock.refresh_heartbeat().await.unwrap());
        let status = lock.status().await.unwrap();
        assert!(status.heartbeat.unwrap() > acquired);
        assert_eq!(status.state, LockState::Running);

        lock.release().await.unwrap();
        assert!(!lock.refresh_heartbeat().await.unwrap());
    }
}
