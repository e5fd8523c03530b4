//! Update coordinator
//!
//! The queue-triggered worker that applies pending updates at the provider.
//!
//! ## Drain Flow
//!
//! ```text
//!  UpdateMessage
//!       │
//!       ▼
//!  ┌──────────┐  lock held, !skip_lock   ┌───────────┐
//!  │ RunLock  │─────────────────────────▶│ Coalesced │
//!  │ acquire  │                          └───────────┘
//!  └──────────┘
//!       │ snapshot
//!       ▼
//!  ┌──────────────────────────┐
//!  │ for each entry (in order)│── retryable error at i ──┐
//!  │  find → compare → update │                          │
//!  │  delete on final outcome │                          ▼
//!  └──────────────────────────┘               ┌──────────────────────┐
//!       │ all settled                         │ notify, enqueue retry│
//!       ▼                                     │ (lock stays held)    │
//!  ┌──────────────────────┐                   └──────────────────────┘
//!  │ notify, release lock │
//!  │ (or re-arm)          │
//!  └──────────────────────┘
//! ```
//!
//! Entries settled in a drain are deleted conditioned on their snapshot
//! versionstamp; an entry that changed mid-drain is kept for the next one.
//!
//! A long drain refreshes the lock heartbeat between entries once
//! `heartbeat_interval_secs` has passed, so the watchdog only fires for a
//! drain that stopped making progress.

mod summary;

pub use summary::{DrainSummary, Outcome};

use crate::backoff::RetryPolicy;
use crate::cache::LookupCache;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::lock::{Acquisition, Release, RunLock};
use crate::message::UpdateMessage;
use crate::pending::{PendingEntry, PendingUpdateSet};
use crate::traits::{DnsProvider, DurableStore, Notifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What happens after a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// A retry drain was enqueued; the lock is still held
    Retry { attempt: u32, delay: Duration },
    /// Lock released
    Unlocked,
    /// Follow-up drain enqueued for work that arrived during this one
    Rearmed,
}

/// Result of [`UpdateCoordinator::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReport {
    /// The lock was held; the request was folded into the next drain
    Coalesced,
    /// A snapshot was processed
    Drained {
        summary: DrainSummary,
        continuation: Continuation,
    },
}

/// How the apply loop ended
enum LoopEnd {
    /// Every entry got a final outcome
    Completed,
    /// Stopped on a retryable failure at this snapshot index
    Halted { index: usize, error: Error },
}

/// Queue-triggered drain worker
///
/// Holds no per-drain state: every call to [`handle`](Self::handle) builds its
/// own [`LookupCache`] and drops it on return, so concurrent deliveries can
/// share one coordinator.
pub struct UpdateCoordinator {
    provider: Arc<dyn DnsProvider>,
    notifier: Arc<dyn Notifier>,
    pending: PendingUpdateSet,
    lock: RunLock,
    retry: RetryPolicy,
    heartbeat_every: Duration,
}

impl UpdateCoordinator {
    /// Create a coordinator over a shared store
    pub fn new(
        store: Arc<dyn DurableStore>,
        provider: Arc<dyn DnsProvider>,
        notifier: Arc<dyn Notifier>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            provider,
            notifier,
            pending: PendingUpdateSet::new(store.clone(), config.conflict_retries),
            lock: RunLock::new(store, config.conflict_retries),
            retry: config.retry,
            heartbeat_every: config.heartbeat_interval(),
        }
    }

    /// The pending update set this coordinator drains
    pub fn pending(&self) -> &PendingUpdateSet {
        &self.pending
    }

    /// The run lock this coordinator takes
    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// Handle one drain request
    ///
    /// Provider failures never surface here; they are classified into the
    /// summary. An `Err` means the store failed, in which case the run lock
    /// may remain held.
    pub async fn handle(&self, message: UpdateMessage) -> Result<DrainReport> {
        debug!(
            "Drain requested (attempt={}, skip_lock={})",
            message.attempt, message.skip_lock
        );

        let snapshot = match self.lock.acquire(&self.pending, message.skip_lock).await? {
            Acquisition::Coalesced => return Ok(DrainReport::Coalesced),
            Acquisition::Acquired(snapshot) => snapshot,
        };

        let mut cache = LookupCache::new();
        let mut summary = DrainSummary::default();
        let end = self.apply(&mut cache, &snapshot, &mut summary).await?;

        if let LoopEnd::Halted { index, ref error } = end {
            warn!(
                "Drain halted at {} on retryable error: {}",
                snapshot[index].update, error
            );
            summary.retry = snapshot[index..]
                .iter()
                .map(|entry| entry.update.clone())
                .collect();
        }

        info!(
            "Drain finished: {} updated, {} unchanged, {} not found, {} failed, {} queued for retry",
            summary.updated.len(),
            summary.unchanged.len(),
            summary.not_found.len(),
            summary.failed.len(),
            summary.retry.len()
        );
        self.notifier.notify(&summary.to_string());

        let continuation = match end {
            LoopEnd::Halted { .. } => {
                let attempt = self.retry.next_attempt(message.attempt);
                let delay = self.retry.delay(message.attempt);
                self.lock
                    .schedule_retry(UpdateMessage::retry(attempt), delay)
                    .await?;
                Continuation::Retry { attempt, delay }
            }
            LoopEnd::Completed => match self.lock.release().await? {
                Release::Unlocked => Continuation::Unlocked,
                Release::Rearmed => Continuation::Rearmed,
            },
        };

        Ok(DrainReport::Drained {
            summary,
            continuation,
        })
    }

    /// Apply the snapshot in order until done or a retryable failure
    async fn apply(
        &self,
        cache: &mut LookupCache,
        snapshot: &[PendingEntry],
        summary: &mut DrainSummary,
    ) -> Result<LoopEnd> {
        let mut last_heartbeat = Instant::now();

        for (index, entry) in snapshot.iter().enumerate() {
            let outcome = match self.apply_one(cache, entry).await {
                Ok(outcome) => outcome,
                Err(error) if error.is_retryable() => {
                    return Ok(LoopEnd::Halted { index, error });
                }
                Err(error) => {
                    warn!("Dropping {}: {}", entry.update, error);
                    Outcome::Failed(error.to_string())
                }
            };

            self.pending.remove(entry).await?;
            summary.record(entry.update.clone(), outcome);

            if last_heartbeat.elapsed() >= self.heartbeat_every {
                self.lock.refresh_heartbeat().await?;
                last_heartbeat = Instant::now();
            }
        }

        Ok(LoopEnd::Completed)
    }

    /// Resolve one entry against the provider
    async fn apply_one(&self, cache: &mut LookupCache, entry: &PendingEntry) -> Result<Outcome> {
        let update = &entry.update;

        let Some(record) = self
            .provider
            .find_record(cache, &update.hostname, update.record_type)
            .await?
        else {
            info!("{} not found at {}", update, self.provider.provider_name());
            return Ok(Outcome::NotFound);
        };

        if record.content == update.value {
            debug!("{} already set", update);
            return Ok(Outcome::Unchanged);
        }

        self.provider
            .update_record(cache, &record, &update.value)
            .await?;
        info!("Updated {} (previous: {})", update, record.content);
        Ok(Outcome::Updated)
    }
}
