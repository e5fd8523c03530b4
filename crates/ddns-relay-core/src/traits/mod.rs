//! Core traits for the DDNS relay
//!
//! This module defines the abstract interfaces the coordinator is built on.
//!
//! - [`DurableStore`]: Versioned key-value store with a delayed task queue
//! - [`DnsProvider`]: Resolve and update records at the DNS provider
//! - [`Notifier`]: Deliver drain summaries

pub mod dns_provider;
pub mod durable_store;
pub mod notifier;

pub use dns_provider::{DnsProvider, DnsRecord, ZoneInfo};
pub use durable_store::{
    AtomicWrite, Check, CommitOutcome, Delivery, DurableStore, Entry, Enqueue, Key, MessageId,
    Mutation, Versionstamp,
};
pub use notifier::{LogNotifier, Notifier};
