//! Queue dispatcher
//!
//! Pulls drain requests from the durable queue and runs the coordinator on
//! each, concurrently. Delivery is at-least-once:
//!
//! - Success (including coalesced and ignored messages): ack
//! - Coordinator error: nack with a fixed redelivery delay, until the
//!   message has been delivered `max_deliveries` times; then ack and drop
//!
//! A coordinator error means the store failed mid-drain, which can leave
//! the run lock held. That is logged loudly here and picked up by the lock
//! watchdog.
//!
//! ## Load Resistance
//!
//! - **Bounded event channel**: events are dropped (with a warning) when full
//! - **No cancellation**: shutdown stops receiving, then waits for in-flight
//!   drains to finish

use crate::config::CoordinatorConfig;
use crate::coordinator::{Continuation, DrainReport, UpdateCoordinator};
use crate::error::Result;
use crate::message::UpdateMessage;
use crate::traits::{Delivery, DurableStore, MessageId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Back-off after the store fails to hand out a message
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Events emitted by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// Dispatcher started
    Started,

    /// The lock was held; the request was folded into the running drain
    Coalesced { id: MessageId },

    /// A drain processed its snapshot
    Drained {
        id: MessageId,
        settled: usize,
        retry: usize,
        continuation: Continuation,
    },

    /// Message was not a drain request; acknowledged and ignored
    Ignored { id: MessageId },

    /// Drain failed; the message will be delivered again
    Failed {
        id: MessageId,
        deliveries: u32,
        error: String,
    },

    /// Drain failed on its last allowed delivery; the message was dropped
    Abandoned {
        id: MessageId,
        deliveries: u32,
        error: String,
    },

    /// Dispatcher stopped
    Stopped { reason: String },
}

/// Everything one delivery task needs
#[derive(Clone)]
struct Worker {
    store: Arc<dyn DurableStore>,
    coordinator: Arc<UpdateCoordinator>,
    max_deliveries: u32,
    redelivery_delay: Duration,
    event_tx: mpsc::Sender<DispatcherEvent>,
}

/// Durable queue consumer driving the [`UpdateCoordinator`]
pub struct QueueDispatcher {
    worker: Worker,
}

impl QueueDispatcher {
    /// Create a dispatcher
    ///
    /// # Returns
    ///
    /// A tuple of (dispatcher, event_receiver)
    pub fn new(
        store: Arc<dyn DurableStore>,
        coordinator: Arc<UpdateCoordinator>,
        config: &CoordinatorConfig,
    ) -> (Self, mpsc::Receiver<DispatcherEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let dispatcher = Self {
            worker: Worker {
                store,
                coordinator,
                max_deliveries: config.max_deliveries,
                redelivery_delay: config.redelivery_delay(),
                event_tx,
            },
        };

        (dispatcher, event_rx)
    }

    /// Run until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Run until `shutdown` completes
    ///
    /// In-flight drains are awaited before returning; the store is flushed
    /// last.
    pub async fn run_with_shutdown<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Queue dispatcher started");
        self.worker.emit(DispatcherEvent::Started);

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                received = self.worker.store.receive() => match received {
                    Ok(delivery) => {
                        let worker = self.worker.clone();
                        tasks.spawn(async move { worker.process(delivery).await });
                    }
                    Err(e) => {
                        error!("Failed to receive from queue: {}", e);
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    }
                },

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Drain task aborted: {}", e);
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight drain(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Drain task aborted: {}", e);
            }
        }

        self.worker.store.flush().await?;
        self.worker.emit(DispatcherEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("Queue dispatcher stopped");

        Ok(())
    }
}

impl Worker {
    async fn process(&self, delivery: Delivery) {
        let id = delivery.id;

        let message = match UpdateMessage::from_payload(&delivery.payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Ignoring queue message {} of another kind", id);
                self.ack(id).await;
                self.emit(DispatcherEvent::Ignored { id });
                return;
            }
            Err(e) => {
                warn!("Dropping malformed queue message {}: {}", id, e);
                self.ack(id).await;
                self.emit(DispatcherEvent::Ignored { id });
                return;
            }
        };

        match self.coordinator.handle(message).await {
            Ok(report) => {
                self.ack(id).await;
                self.emit(match report {
                    DrainReport::Coalesced => DispatcherEvent::Coalesced { id },
                    DrainReport::Drained {
                        summary,
                        continuation,
                    } => DispatcherEvent::Drained {
                        id,
                        settled: summary.settled(),
                        retry: summary.retry.len(),
                        continuation,
                    },
                });
            }
            Err(e) if delivery.deliveries >= self.max_deliveries => {
                error!(
                    "Drain for message {} failed on delivery {} of {}, dropping it; the run lock may remain held: {}",
                    id, delivery.deliveries, self.max_deliveries, e
                );
                self.ack(id).await;
                self.emit(DispatcherEvent::Abandoned {
                    id,
                    deliveries: delivery.deliveries,
                    error: e.to_string(),
                });
            }
            Err(e) => {
                error!(
                    "Drain for message {} failed (delivery {}), redelivering in {}s; the run lock may remain held: {}",
                    id,
                    delivery.deliveries,
                    self.redelivery_delay.as_secs(),
                    e
                );
                if let Err(nack_err) = self.store.nack(id, self.redelivery_delay).await {
                    error!("Failed to nack message {}: {}", id, nack_err);
                }
                self.emit(DispatcherEvent::Failed {
                    id,
                    deliveries: delivery.deliveries,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn ack(&self, id: MessageId) {
        if let Err(e) = self.store.ack(id).await {
            error!("Failed to ack message {}: {}", id, e);
        }
    }

    fn emit(&self, event: DispatcherEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}
