//! Lock watchdog
//!
//! The run lock has no lease. If a drain dies between acquiring the lock and
//! releasing it (or scheduling its retry), the lock stays held and every
//! later trigger coalesces into a drain that never comes. The watchdog makes
//! that state visible: it periodically reads the lock, and when the lock is
//! held but its heartbeat is older than the alert threshold it logs at
//! `error` and sends an alert through the notifier.
//!
//! The heartbeat is written on acquire, on every scheduled retry and between
//! entries of a running drain (see `heartbeat_interval_secs`). A drain only
//! goes quiet for longer than that inside a single provider call, which the
//! provider's HTTP timeout bounds well below the alert threshold.
//!
//! The watchdog never clears the lock. Recovering is an operator decision.

use crate::error::Result;
use crate::lock::{LockState, RunLock};
use crate::traits::Notifier;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// A lock that looks abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledLock {
    pub state: LockState,
    /// Last heartbeat, if the holder ever wrote one
    pub heartbeat: Option<DateTime<Utc>>,
}

impl fmt::Display for StalledLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.heartbeat {
            Some(at) => write!(
                f,
                "Run lock is held ({:?}) with no progress since {}. Pending updates will not be applied until the lock is cleared.",
                self.state,
                at.to_rfc3339()
            ),
            None => write!(
                f,
                "Run lock is held ({:?}) without a heartbeat. Pending updates will not be applied until the lock is cleared.",
                self.state
            ),
        }
    }
}

/// Periodic run-lock health check
pub struct LockWatchdog {
    lock: RunLock,
    notifier: Arc<dyn Notifier>,
    alert_after: Duration,
    interval: Duration,
}

impl LockWatchdog {
    pub fn new(
        lock: RunLock,
        notifier: Arc<dyn Notifier>,
        alert_after: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            lock,
            notifier,
            alert_after,
            interval,
        }
    }

    /// Check the lock once at time `now`
    pub async fn check(&self, now: DateTime<Utc>) -> Result<Option<StalledLock>> {
        let status = self.lock.status().await?;
        if status.state == LockState::Idle {
            return Ok(None);
        }

        let stalled = match status.heartbeat {
            Some(at) => (now - at)
                .to_std()
                .map(|age| age > self.alert_after)
                .unwrap_or(false),
            None => true,
        };

        Ok(stalled.then_some(StalledLock {
            state: status.state,
            heartbeat: status.heartbeat,
        }))
    }

    /// Check every `interval` until `shutdown` completes
    ///
    /// Alerts once per stalled heartbeat; a new alert is only raised after
    /// the heartbeat moves and stalls again.
    pub async fn run_with_shutdown<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Lock watchdog started (alert after {}s)",
            self.alert_after.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        let mut alerted: Option<StalledLock> = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            match self.check(Utc::now()).await {
                Ok(Some(stalled)) => {
                    let repeat = alerted
                        .as_ref()
                        .is_some_and(|previous| previous.heartbeat == stalled.heartbeat);
                    if repeat {
                        debug!("Run lock still stalled");
                        continue;
                    }
                    error!("{}", stalled);
                    self.notifier.notify(&stalled.to_string());
                    alerted = Some(stalled);
                }
                Ok(None) => {
                    if alerted.take().is_some() {
                        info!("Run lock recovered");
                    }
                }
                Err(e) => error!("Lock watchdog failed to read the run lock: {}", e),
            }
        }

        info!("Lock watchdog stopped");
    }
}
