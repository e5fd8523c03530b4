//! Drain summary
//!
//! Partitions the snapshot of one drain by outcome and renders the text
//! handed to the notifier.

use crate::pending::PendingUpdate;
use std::fmt;

/// How one pending entry ended in a drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Written at the provider
    Updated,
    /// Provider already had the value; nothing written
    Unchanged,
    /// No such record at the provider
    NotFound,
    /// Terminal provider error; dropped
    Failed(String),
}

/// Outcomes of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub updated: Vec<PendingUpdate>,
    pub unchanged: Vec<PendingUpdate>,
    pub not_found: Vec<PendingUpdate>,
    pub failed: Vec<(PendingUpdate, String)>,
    /// Left pending for the retry drain
    pub retry: Vec<PendingUpdate>,
}

impl DrainSummary {
    pub fn record(&mut self, update: PendingUpdate, outcome: Outcome) {
        match outcome {
            Outcome::Updated => self.updated.push(update),
            Outcome::Unchanged => self.unchanged.push(update),
            Outcome::NotFound => self.not_found.push(update),
            Outcome::Failed(error) => self.failed.push((update, error)),
        }
    }

    /// Number of entries with a final outcome
    pub fn settled(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.not_found.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settled() == 0 && self.retry.is_empty()
    }
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<String> = self
            .failed
            .iter()
            .map(|(update, error)| format!("{}: {}", update, error))
            .collect();
        let plain = |updates: &[PendingUpdate]| -> Vec<String> {
            updates.iter().map(ToString::to_string).collect()
        };

        let sections = [
            ("Updated", plain(&self.updated)),
            ("Unchanged, ignored", plain(&self.unchanged)),
            ("Skipped (record not found)", plain(&self.not_found)),
            ("Failed", failed),
            ("Queued for retry", plain(&self.retry)),
        ];

        let rendered: Vec<String> = sections
            .iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(title, lines)| format!("{}:\n{}", title, lines.join("\n")))
            .collect();

        if rendered.is_empty() {
            f.write_str("Nothing to update")
        } else {
            f.write_str(&rendered.join("\n\n"))
        }
    }
}
