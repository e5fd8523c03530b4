// # Memory Store
//
// In-memory implementation of DurableStore.
//
// ## Purpose
//
// Provides the full store contract (versionstamps, conditional commits,
// delayed at-least-once queue) without persistence. Useful for tests and for
// deployments where losing pending updates on restart is acceptable.
//
// ## Crash Behavior
//
// - Pending updates, lock flags and queued drains are lost on restart
// - A lock left held by a crashed drain disappears with the process

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::table::{self, QueuedMessage, Table};
use crate::Error;
use crate::traits::durable_store::{
    AtomicWrite, CommitOutcome, Delivery, DurableStore, Entry, Key, MessageId,
};

/// In-memory durable store
///
/// Cloning yields another handle to the same store.
///
/// # Example
///
/// ```rust,no_run
/// use ddns_relay_core::state::MemoryStore;
/// use ddns_relay_core::traits::{AtomicWrite, DurableStore, Key};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let key = Key::from(["queue", "locked"]);
///
///     let entry = store.get(&key).await?;
///     let write = AtomicWrite::new().check(&entry).set(key.clone(), true.into());
///     assert!(store.commit(write).await?.is_committed());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    table: Mutex<Table>,
    notify: Notify,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently in the queue, delivered or not
    pub async fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.inner.table.lock().await.queued()
    }

    /// Remove every queued message without delivering it
    pub async fn clear_queue(&self) -> usize {
        let mut table = self.inner.table.lock().await;
        let ids: Vec<MessageId> = table.queued().iter().map(|m| m.id).collect();
        for id in &ids {
            table.ack(*id);
        }
        ids.len()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Entry, Error> {
        Ok(self.inner.table.lock().await.get(key))
    }

    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, Error> {
        let table = self.inner.table.lock().await;
        Ok(keys.iter().map(|key| table.get(key)).collect())
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Entry>, Error> {
        Ok(self.inner.table.lock().await.list(prefix))
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, Error> {
        let enqueues = !write.enqueues.is_empty();
        let outcome = self.inner.table.lock().await.apply(write, Utc::now());
        if enqueues && outcome.is_committed() {
            self.inner.notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn receive(&self) -> Result<Delivery, Error> {
        Ok(table::wait_for_delivery(&self.inner.table, &self.inner.notify).await)
    }

    async fn ack(&self, id: MessageId) -> Result<(), Error> {
        if !self.inner.table.lock().await.ack(id) {
            tracing::debug!("ack for unknown message {}", id);
        }
        Ok(())
    }

    async fn nack(&self, id: MessageId, delay: Duration) -> Result<(), Error> {
        let found = self.inner.table.lock().await.nack(id, delay, Utc::now());
        if found {
            self.inner.notify.notify_waiters();
        } else {
            tracing::debug!("nack for unknown message {}", id);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing to persist
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_conditional_commit() {
        let store = MemoryStore::new();
        let key = Key::from(["toUpdate", "a.example.com", "A"]);

        let absent = store.get(&key).await.unwrap();
        assert!(absent.value.is_none());

        let write = AtomicWrite::new()
            .check(&absent)
            .set(key.clone(), json!("1.2.3.4"));
        assert!(store.commit(write.clone()).await.unwrap().is_committed());
        assert_eq!(store.commit(write).await.unwrap(), CommitOutcome::Conflict);

        let entries = store.list(&Key::from(["toUpdate"])).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, Some(json!("1.2.3.4")));
    }

    #[tokio::test]
    async fn test_memory_store_get_many_keeps_order() {
        let store = MemoryStore::new();
        store
            .commit(AtomicWrite::new().set(Key::from(["queue", "queued"]), json!(true)))
            .await
            .unwrap();

        let entries = store
            .get_many(&[Key::from(["queue", "locked"]), Key::from(["queue", "queued"])])
            .await
            .unwrap();
        assert!(!entries[0].as_flag());
        assert!(entries[1].as_flag());
    }

    #[tokio::test]
    async fn test_memory_store_receive_wakes_on_enqueue() {
        let store = MemoryStore::new();
        let receiver = {
            let store = store.clone();
            tokio::spawn(async move { store.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .commit(AtomicWrite::new().enqueue(json!({"kind": "update"}), Duration::ZERO))
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), receiver)
            .await
            .expect("receive should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, json!({"kind": "update"}));

        store.ack(delivery.id).await.unwrap();
        assert!(store.queued_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_delayed_delivery() {
        let store = MemoryStore::new();
        store
            .commit(AtomicWrite::new().enqueue(json!(1), Duration::from_millis(150)))
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_millis(50), store.receive()).await;
        assert!(early.is_err(), "message must not be delivered before its delay");

        let delivery = tokio::time::timeout(Duration::from_secs(2), store.receive())
            .await
            .expect("message becomes due")
            .unwrap();
        assert_eq!(delivery.payload, json!(1));
    }

    #[tokio::test]
    async fn test_memory_store_nack_redelivers() {
        let store = MemoryStore::new();
        store
            .commit(AtomicWrite::new().enqueue(json!(1), Duration::ZERO))
            .await
            .unwrap();

        let first = store.receive().await.unwrap();
        store.nack(first.id, Duration::ZERO).await.unwrap();
        let second = store.receive().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.deliveries, 2);
    }
}
