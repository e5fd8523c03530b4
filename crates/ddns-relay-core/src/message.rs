//! Queue message format
//!
//! Drain triggers travel through the durable queue as JSON:
//!
//! ```json
//! { "kind": "update", "attempt": 0, "skip_lock": false }
//! ```

use serde::{Deserialize, Serialize};

/// A message understood by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueMessage {
    Update(UpdateMessage),
}

/// Request to drain the pending update set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Retry attempt this drain belongs to (0 for fresh triggers)
    #[serde(default)]
    pub attempt: u32,

    /// Bypass the run lock; set on drains that continue the run holding it
    #[serde(default)]
    pub skip_lock: bool,
}

impl UpdateMessage {
    /// Trigger sent by the front door after recording updates
    pub fn trigger() -> Self {
        Self {
            attempt: 0,
            skip_lock: false,
        }
    }

    /// Follow-up drain for work that arrived while the lock was held
    pub fn rearm() -> Self {
        Self {
            attempt: 0,
            skip_lock: true,
        }
    }

    /// Retry drain continuing a run that stopped on a retryable failure
    pub fn retry(attempt: u32) -> Self {
        Self {
            attempt,
            skip_lock: true,
        }
    }

    /// Encode for the queue
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "update",
            "attempt": self.attempt,
            "skip_lock": self.skip_lock,
        })
    }

    /// Decode a queue payload
    ///
    /// Returns `Ok(None)` for well-formed messages of another kind, which the
    /// dispatcher acknowledges and ignores.
    pub fn from_payload(payload: &serde_json::Value) -> crate::Result<Option<Self>> {
        match payload.get("kind").and_then(serde_json::Value::as_str) {
            Some("update") => match serde_json::from_value(payload.clone())? {
                QueueMessage::Update(message) => Ok(Some(message)),
            },
            Some(_) => Ok(None),
            None => Err(crate::Error::invalid_input(format!(
                "queue message without kind: {}",
                payload
            ))),
        }
    }
}
