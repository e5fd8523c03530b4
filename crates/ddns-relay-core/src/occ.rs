//! Optimistic concurrency helper
//!
//! Every read-modify-write against the durable store goes through
//! [`retry_on_conflict`]: read with versionstamps, compute, commit conditioned
//! on those stamps, and start over from the read when the commit conflicts.

use crate::error::{Error, Result};
use std::future::Future;
use tracing::{debug, trace};

/// Run `attempt` until it commits
///
/// `attempt` returns `Ok(Some(value))` once its commit went through and
/// `Ok(None)` when the commit hit a conflict. Errors abort immediately.
/// After `max_attempts` conflicts in a row, gives up with [`Error::Conflict`].
pub async fn retry_on_conflict<T, F, Fut>(
    label: &str,
    max_attempts: usize,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for n in 1..=max_attempts {
        match attempt().await? {
            Some(value) => {
                if n > 1 {
                    debug!("{} committed after {} attempts", label, n);
                }
                return Ok(value);
            }
            None => trace!("{}: commit conflict on attempt {}, retrying", label, n),
        }
    }

    Err(Error::conflict(format!(
        "{}: gave up after {} conflicting commits",
        label, max_attempts
    )))
}
