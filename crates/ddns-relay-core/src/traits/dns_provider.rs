// # DNS Provider Trait
//
// Defines the interface the coordinator uses to resolve and mutate records
// at the DNS provider.
//
// ## Implementations
//
// - Cloudflare: `ddns-relay-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_relay_core::{DnsProvider, LookupCache, RecordType};
//
// let mut cache = LookupCache::new();
// if let Some(record) = provider.find_record(&mut cache, "a.example.com", RecordType::A).await? {
//     provider.update_record(&mut cache, &record, "1.2.3.4").await?;
// }
// ```

use crate::cache::LookupCache;
use crate::config::RecordType;
use async_trait::async_trait;

/// A DNS record as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Provider record identifier
    pub id: String,
    /// Provider zone identifier
    pub zone_id: String,
    /// Fully-qualified record name
    pub name: String,
    /// Record type
    pub record_type: RecordType,
    /// Record content (the IP address for A/AAAA)
    pub content: String,
    /// Time-to-live, if the provider reports one
    pub ttl: Option<u32>,
    /// Provider-specific proxy flag
    pub proxied: Option<bool>,
}

/// A provider zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    pub id: String,
    pub name: String,
}

/// Trait for DNS provider implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe; concurrent drains share one provider.
/// Per-drain lookup state is passed in explicitly through [`LookupCache`],
/// never kept inside the provider.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Read and fill the caller's `LookupCache`
/// - ✅ Return success or a classified failure (the coordinator decides retries)
///
/// ## Forbidden Capabilities
/// - ❌ Implement retry logic or backoff (owned by `UpdateCoordinator`)
/// - ❌ Access the durable store
/// - ❌ Cache lookups anywhere but the caller's `LookupCache`
/// - ❌ Decide whether an update is needed (owned by `UpdateCoordinator`)
///
/// ## Error Classification
///
/// Failures must be reported so that [`crate::Error::is_retryable`] is true
/// exactly for provider-side faults: `Error::Upstream` with a 5xx status or
/// `Error::Transport`. Anything else drops the entry.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Find the record with exactly this name and type
    ///
    /// # Returns
    ///
    /// - `Ok(Some(DnsRecord))`: The record exists upstream
    /// - `Ok(None)`: No such record (or no zone for the hostname)
    /// - `Err(Error)`: The lookup failed
    async fn find_record(
        &self,
        cache: &mut LookupCache,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecord>, crate::Error>;

    /// Set a record's content
    ///
    /// # Returns
    ///
    /// - `Ok(DnsRecord)`: The record as stored by the provider after the update
    /// - `Err(Error)`: The update failed
    async fn update_record(
        &self,
        cache: &mut LookupCache,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
