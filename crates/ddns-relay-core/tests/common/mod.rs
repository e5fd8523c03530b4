//! Test doubles and common utilities for relay contract tests
//!
//! This module provides a scripted in-memory DNS provider, a recording
//! notifier and a harness that wires them to a `MemoryStore`.

#![allow(dead_code)]

use async_trait::async_trait;
use ddns_relay_core::config::{Credential, NameConfig};
use ddns_relay_core::error::{Error, Result};
use ddns_relay_core::traits::{DnsRecord, DurableStore, Notifier};
use ddns_relay_core::{
    CoordinatorConfig, DrainReport, FrontDoor, LookupCache, MemoryStore, RecordType,
    UpdateCoordinator, UpdateMessage,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const USER: &str = "router";
pub const PASSWORD: &str = "hunter2";

/// `Authorization` header for `USER:PASSWORD`
pub fn auth_header() -> String {
    // base64("router:hunter2")
    "Basic cm91dGVyOmh1bnRlcjI=".to_string()
}

/// An in-memory DNS provider with scriptable failures
///
/// Records live in a map keyed by (hostname, type). Failures are queued per
/// hostname and consumed by `update_record` in order. An optional gate makes
/// `update_record` wait for a permit, so tests can observe a drain mid-flight.
#[derive(Default)]
pub struct ScriptedProvider {
    records: Mutex<HashMap<(String, RecordType), String>>,
    failures: Mutex<HashMap<String, VecDeque<u16>>>,
    find_calls: AtomicUsize,
    update_calls: AtomicUsize,
    writes: Mutex<Vec<(String, RecordType, String)>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with these upstream records
    pub fn with_records(records: &[(&str, RecordType, &str)]) -> Self {
        let provider = Self::new();
        for (hostname, record_type, content) in records {
            provider.set(hostname, *record_type, content);
        }
        provider
    }

    /// Make every `update_record` wait for a permit from the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn set(&self, hostname: &str, record_type: RecordType, content: &str) {
        self.records
            .lock()
            .unwrap()
            .insert((hostname.to_string(), record_type), content.to_string());
    }

    pub fn get(&self, hostname: &str, record_type: RecordType) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .get(&(hostname.to_string(), record_type))
            .cloned()
    }

    /// Fail the next update of `hostname` with this HTTP status
    pub fn fail_next(&self, hostname: &str, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .entry(hostname.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Successful writes, in order
    pub fn writes(&self) -> Vec<(String, RecordType, String)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ddns_relay_core::DnsProvider for ScriptedProvider {
    async fn find_record(
        &self,
        _cache: &mut LookupCache,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecord>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(hostname, record_type).map(|content| DnsRecord {
            id: format!("{}-{}", hostname, record_type),
            zone_id: "zone-1".to_string(),
            name: hostname.to_string(),
            record_type,
            content,
            ttl: Some(60),
            proxied: Some(false),
        }))
    }

    async fn update_record(
        &self,
        _cache: &mut LookupCache,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&record.name)
            .and_then(VecDeque::pop_front);
        if let Some(status) = failure {
            return Err(Error::upstream("scripted", status, "scripted failure"));
        }

        self.set(&record.name, record.record_type, content);
        self.writes.lock().unwrap().push((
            record.name.clone(),
            record.record_type,
            content.to_string(),
        ));
        Ok(DnsRecord {
            content: content.to_string(),
            ..record.clone()
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// A notifier that keeps every message
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Name configuration updating A and AAAA on the name itself
pub fn name_config() -> NameConfig {
    NameConfig {
        records: vec![RecordType::A, RecordType::AAAA],
        v4alt: None,
        v6alt: None,
        auth: vec![Credential {
            username: USER.to_string(),
            password: PASSWORD.to_string(),
        }],
    }
}

/// Store, provider, notifier, coordinator and front door wired together
pub struct Harness {
    pub store: MemoryStore,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: Arc<UpdateCoordinator>,
    pub front_door: FrontDoor,
    pub config: CoordinatorConfig,
}

impl Harness {
    /// Harness accepting updates for `hostnames` (all using [`name_config`])
    pub fn new(provider: ScriptedProvider, hostnames: &[&str]) -> Self {
        Self::with_store(MemoryStore::new(), provider, hostnames)
    }

    pub fn with_store(store: MemoryStore, provider: ScriptedProvider, hostnames: &[&str]) -> Self {
        let config = CoordinatorConfig::default();
        let provider = Arc::new(provider);
        let notifier = Arc::new(RecordingNotifier::default());
        let shared: Arc<dyn DurableStore> = Arc::new(store.clone());

        let coordinator = Arc::new(UpdateCoordinator::new(
            shared,
            provider.clone(),
            notifier.clone(),
            &config,
        ));

        let names: BTreeMap<String, NameConfig> = hostnames
            .iter()
            .map(|h| (h.to_string(), name_config()))
            .collect();
        let front_door = FrontDoor::new(names, coordinator.pending().clone());

        Self {
            store,
            provider,
            notifier,
            coordinator,
            front_door,
            config,
        }
    }

    /// Send an authenticated `/nic/update` request
    pub async fn update(&self, hostname: &str, myip: &str) -> String {
        let query = format!("hostname={}&myip={}", hostname, myip);
        let response = self
            .front_door
            .handle("/nic/update", Some(&query), Some(&auth_header()))
            .await;
        assert_eq!(response.status, 200);
        response.body
    }

    /// Receive the next due queue message, run it and ack it
    pub async fn run_next(&self) -> DrainReport {
        let delivery = tokio::time::timeout(Duration::from_secs(2), self.store.receive())
            .await
            .expect("a queue message should be due")
            .expect("receive succeeds");
        let message = UpdateMessage::from_payload(&delivery.payload)
            .expect("valid message")
            .expect("update message");
        let report = self
            .coordinator
            .handle(message)
            .await
            .expect("drain succeeds");
        self.store.ack(delivery.id).await.expect("ack succeeds");
        report
    }

    /// Payloads of every queued message
    pub async fn queued_payloads(&self) -> Vec<serde_json::Value> {
        self.store
            .queued_messages()
            .await
            .into_iter()
            .map(|m| m.payload)
            .collect()
    }

    /// Pending (hostname, type, value) triples
    pub async fn pending(&self) -> Vec<(String, RecordType, String)> {
        self.coordinator
            .pending()
            .snapshot()
            .await
            .expect("snapshot succeeds")
            .into_iter()
            .map(|e| (e.update.hostname, e.update.record_type, e.update.value))
            .collect()
    }
}
