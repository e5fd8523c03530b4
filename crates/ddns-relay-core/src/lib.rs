// # ddns-relay-core
//
// Core library for the DDNS relay.
//
// ## Architecture Overview
//
// Update clients (routers, devices) report their address to the front door,
// which records the desired record values durably and triggers a drain. The
// coordinator applies pending values at the DNS provider asynchronously:
//
// - **DurableStore**: Versioned key-value store with a delayed at-least-once queue
// - **PendingUpdateSet**: Record values accepted but not yet applied
// - **RunLock**: Single-flight protocol so that only one drain talks to the provider
// - **UpdateCoordinator**: Drain/apply/retry state machine
// - **QueueDispatcher**: Runs the coordinator for every queued drain request
// - **LockWatchdog**: Alerts when the run lock is held without progress
// - **FrontDoor**: The `/nic/update` request logic
// - **DnsProvider** / **Notifier**: Provider client and summary sink, implemented
//   in their own crates
//
// ## Design Principles
//
// 1. **Durability first**: An accepted update is in the store before the client hears `good`
// 2. **Optimistic concurrency**: Every read-modify-write is a conditional commit in a retry loop
// 3. **Coalescing**: Triggers arriving during a drain merge into one follow-up drain
// 4. **Classified failures**: Provider faults are retried with backoff; client faults drop the entry
// 5. **Library-First**: The daemon is a thin shell around this crate

pub mod backoff;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod frontdoor;
pub mod lock;
pub mod message;
pub mod occ;
pub mod pending;
pub mod state;
pub mod traits;
pub mod watchdog;

// Re-export core types for convenience
pub use backoff::RetryPolicy;
pub use cache::LookupCache;
pub use config::{
    CoordinatorConfig, NameConfig, NotifierConfig, ProviderConfig, RecordType, RelayConfig,
    StoreConfig,
};
pub use coordinator::{Continuation, DrainReport, DrainSummary, Outcome, UpdateCoordinator};
pub use dispatcher::{DispatcherEvent, QueueDispatcher};
pub use error::{Error, Result};
pub use frontdoor::{FrontDoor, UpdateResponse};
pub use lock::{Acquisition, LockState, LockStatus, Release, RunLock};
pub use message::UpdateMessage;
pub use pending::{PendingEntry, PendingUpdate, PendingUpdateSet};
pub use state::{FileStore, MemoryStore};
pub use traits::{DnsProvider, DurableStore, LogNotifier, Notifier};
pub use watchdog::{LockWatchdog, StalledLock};
