//! Contract Test: Update Front Door
//!
//! The `/nic/update` endpoint authorizes every listed hostname, records the
//! implied pending updates together with one drain trigger, and answers
//! without waiting for the provider.
//!
//! Constraints verified:
//! - Unknown paths get 404
//! - Credentials must unlock every listed hostname, else `badauth`
//! - Writes and trigger are committed together
//! - Response has one `good` line per hostname
//! - No provider call happens during the request

mod common;

use common::*;
use ddns_relay_core::config::NameConfig;
use ddns_relay_core::{FrontDoor, MemoryStore, PendingUpdateSet, RecordType, UpdateMessage};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test]
async fn unknown_path_is_not_found() {
    let harness = Harness::new(ScriptedProvider::new(), &["a.example.com"]);
    let response = harness
        .front_door
        .handle("/update", Some("hostname=a.example.com"), Some(&auth_header()))
        .await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "404");
}

#[tokio::test]
async fn bad_credentials_are_rejected_without_writes() {
    let harness = Harness::new(ScriptedProvider::new(), &["a.example.com", "b.example.com"]);
    let query = Some("hostname=a.example.com&myip=1.2.3.4");

    // base64("router:wrong")
    let wrong = harness
        .front_door
        .handle("/nic/update", query, Some("Basic cm91dGVyOndyb25n"))
        .await;
    let missing = harness.front_door.handle("/nic/update", query, None).await;
    let garbage = harness
        .front_door
        .handle("/nic/update", query, Some("Basic ???"))
        .await;
    let unknown_host = harness
        .front_door
        .handle(
            "/nic/update",
            Some("hostname=a.example.com,x.example.com&myip=1.2.3.4"),
            Some(&auth_header()),
        )
        .await;
    let no_host = harness
        .front_door
        .handle("/nic/update", Some("myip=1.2.3.4"), Some(&auth_header()))
        .await;

    for response in [wrong, missing, garbage, unknown_host, no_host] {
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "badauth");
    }
    assert!(harness.pending().await.is_empty());
    assert!(harness.queued_payloads().await.is_empty());
}

#[tokio::test]
async fn accepted_update_records_values_and_one_trigger() {
    let harness = Harness::new(ScriptedProvider::new(), &["a.example.com", "b.example.com"]);

    let body = harness
        .update("a.example.com,b.example.com", "1.2.3.4,2001:db8::1")
        .await;

    assert_eq!(body, "good 1.2.3.4,2001:db8::1\ngood 1.2.3.4,2001:db8::1");
    assert_eq!(
        harness.pending().await,
        vec![
            ("a.example.com".to_string(), RecordType::A, "1.2.3.4".to_string()),
            ("a.example.com".to_string(), RecordType::AAAA, "2001:db8::1".to_string()),
            ("b.example.com".to_string(), RecordType::A, "1.2.3.4".to_string()),
            ("b.example.com".to_string(), RecordType::AAAA, "2001:db8::1".to_string()),
        ]
    );
    assert_eq!(
        harness.queued_payloads().await,
        vec![UpdateMessage::trigger().to_payload()]
    );
    assert_eq!(harness.provider.find_calls(), 0);
    assert_eq!(harness.provider.update_calls(), 0);
}

#[tokio::test]
async fn alternate_names_receive_their_family() {
    let store = MemoryStore::new();
    let pending = PendingUpdateSet::new(Arc::new(store.clone()), 8);

    let mut name = name_config();
    name.records = vec![RecordType::AAAA];
    name.v4alt = Some("v4.example.com".to_string());
    let names: BTreeMap<String, NameConfig> =
        [("home.example.com".to_string(), name)].into_iter().collect();
    let front_door = FrontDoor::new(names, pending.clone());

    let response = front_door
        .handle(
            "/nic/update",
            Some("hostname=home.example.com&myip=203.0.113.7,2001:db8::7"),
            Some(&auth_header()),
        )
        .await;
    assert_eq!(response.body, "good 203.0.113.7,2001:db8::7");

    let recorded: Vec<(String, RecordType, String)> = pending
        .snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.update.hostname, e.update.record_type, e.update.value))
        .collect();
    assert_eq!(
        recorded,
        vec![
            ("home.example.com".to_string(), RecordType::AAAA, "2001:db8::7".to_string()),
            ("v4.example.com".to_string(), RecordType::A, "203.0.113.7".to_string()),
        ]
    );
}
