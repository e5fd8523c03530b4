// # Versioned Table
//
// The in-process data structure behind both store implementations: a
// key-ordered map of versionstamped values plus the delayed message queue.
// `MemoryStore` keeps one behind a mutex; `FileStore` additionally persists
// an image of it after every change.

use crate::traits::durable_store::{
    AtomicWrite, CommitOutcome, Delivery, Entry, Key, MessageId, Mutation, Versionstamp,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// A stored value with the versionstamp of the commit that wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Versioned {
    value: serde_json::Value,
    versionstamp: Versionstamp,
}

/// A message waiting in (or delivered from) the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: serde_json::Value,
    /// Earliest time the message may be delivered
    pub ready_at: DateTime<Utc>,
    /// Deliveries so far
    pub deliveries: u32,
}

/// Serializable image of a table (in-flight markers are not persisted, so
/// messages in flight at a crash are delivered again on restart)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TableImage {
    last_versionstamp: u64,
    last_message_id: u64,
    entries: Vec<ImageEntry>,
    queue: Vec<QueuedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageEntry {
    key: Key,
    value: serde_json::Value,
    versionstamp: Versionstamp,
}

impl TableImage {
    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn message_count(&self) -> usize {
        self.queue.len()
    }
}

/// Result of polling the queue
pub(crate) enum QueuePoll {
    /// A message was marked in flight
    Ready(Delivery),
    /// Nothing due yet; the next message becomes due after this long
    Wait(Duration),
    /// Nothing queued (or everything is in flight)
    Empty,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    last_versionstamp: u64,
    last_message_id: u64,
    entries: BTreeMap<Key, Versioned>,
    queue: Vec<QueuedMessage>,
    in_flight: HashSet<MessageId>,
}

impl Table {
    pub(crate) fn from_image(image: TableImage) -> Self {
        Self {
            last_versionstamp: image.last_versionstamp,
            last_message_id: image.last_message_id,
            entries: image
                .entries
                .into_iter()
                .map(|e| {
                    (
                        e.key,
                        Versioned {
                            value: e.value,
                            versionstamp: e.versionstamp,
                        },
                    )
                })
                .collect(),
            queue: image.queue,
            in_flight: HashSet::new(),
        }
    }

    pub(crate) fn image(&self) -> TableImage {
        TableImage {
            last_versionstamp: self.last_versionstamp,
            last_message_id: self.last_message_id,
            entries: self
                .entries
                .iter()
                .map(|(key, v)| ImageEntry {
                    key: key.clone(),
                    value: v.value.clone(),
                    versionstamp: v.versionstamp,
                })
                .collect(),
            queue: self.queue.clone(),
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Entry {
        let stored = self.entries.get(key);
        Entry {
            key: key.clone(),
            value: stored.map(|v| v.value.clone()),
            versionstamp: stored.map(|v| v.versionstamp),
        }
    }

    pub(crate) fn list(&self, prefix: &Key) -> Vec<Entry> {
        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, v)| Entry {
                key: key.clone(),
                value: Some(v.value.clone()),
                versionstamp: Some(v.versionstamp),
            })
            .collect()
    }

    pub(crate) fn apply(&mut self, write: AtomicWrite, now: DateTime<Utc>) -> CommitOutcome {
        for check in &write.checks {
            let current = self.entries.get(&check.key).map(|v| v.versionstamp);
            if current != check.versionstamp {
                return CommitOutcome::Conflict;
            }
        }

        self.last_versionstamp += 1;
        let versionstamp = Versionstamp(self.last_versionstamp);

        for mutation in write.mutations {
            match mutation {
                Mutation::Set(key, value) => {
                    self.entries.insert(
                        key,
                        Versioned {
                            value,
                            versionstamp,
                        },
                    );
                }
                Mutation::Delete(key) => {
                    self.entries.remove(&key);
                }
            }
        }

        for enqueue in write.enqueues {
            self.last_message_id += 1;
            self.queue.push(QueuedMessage {
                id: MessageId(self.last_message_id),
                payload: enqueue.payload,
                ready_at: after(now, enqueue.delay),
                deliveries: 0,
            });
        }

        CommitOutcome::Committed(versionstamp)
    }

    pub(crate) fn poll_queue(&mut self, now: DateTime<Utc>) -> QueuePoll {
        let next = self
            .queue
            .iter_mut()
            .filter(|m| !self.in_flight.contains(&m.id))
            .min_by_key(|m| (m.ready_at, m.id));

        match next {
            None => QueuePoll::Empty,
            Some(message) if message.ready_at <= now => {
                message.deliveries += 1;
                self.in_flight.insert(message.id);
                QueuePoll::Ready(Delivery {
                    id: message.id,
                    payload: message.payload.clone(),
                    deliveries: message.deliveries,
                })
            }
            Some(message) => QueuePoll::Wait(
                (message.ready_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            ),
        }
    }

    /// Remove a message; returns whether it existed
    pub(crate) fn ack(&mut self, id: MessageId) -> bool {
        self.in_flight.remove(&id);
        let before = self.queue.len();
        self.queue.retain(|m| m.id != id);
        self.queue.len() != before
    }

    /// Make an in-flight message deliverable again; returns whether it existed
    pub(crate) fn nack(&mut self, id: MessageId, delay: Duration, now: DateTime<Utc>) -> bool {
        self.in_flight.remove(&id);
        match self.queue.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.ready_at = after(now, delay);
                true
            }
            None => false,
        }
    }

    pub(crate) fn queued(&self) -> Vec<QueuedMessage> {
        self.queue.clone()
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Wait until the table has a due message and hand it out
///
/// `notify` must be signalled (`notify_waiters`) whenever messages are
/// enqueued or returned to the queue.
pub(crate) async fn wait_for_delivery(table: &Mutex<Table>, notify: &Notify) -> Delivery {
    loop {
        // Registered before polling so a concurrent enqueue cannot be missed.
        let notified = notify.notified();
        tokio::pin!(notified);

        let poll = table.lock().await.poll_queue(Utc::now());
        match poll {
            QueuePoll::Ready(delivery) => return delivery,
            QueuePoll::Wait(wait) => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            QueuePoll::Empty => notified.await,
        }
    }
}
