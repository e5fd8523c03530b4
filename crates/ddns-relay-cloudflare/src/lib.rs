// # Cloudflare DNS Provider
//
// This crate provides the Cloudflare API v4 client the update coordinator
// uses to resolve and rewrite A/AAAA records.
//
// ## Behavior
//
// - ✅ Zone lookup by the two-label suffix of the hostname, cached per drain
// - ✅ Paged record lookup for an exact (name, type) match, pages cached per drain
// - ✅ Record edit that keeps name, type, ttl and proxy flag
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Status-classified errors (5xx and transport failures are retryable)
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry logic (owned by UpdateCoordinator)
// - ❌ NO backoff logic (owned by UpdateCoordinator)
// - ❌ NO caching outside the caller's LookupCache
// - ❌ NO background tasks
//
// ## Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS API calls to the Cloudflare API only
// - ✅ Parse provider-specific responses
// - ✅ Read and fill the caller's LookupCache
//
// **Forbidden Capabilities**:
// - ❌ Access the durable store
// - ❌ Decide whether an update is needed (owned by UpdateCoordinator)
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - Provider MUST fail fast if token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?name=...&page=...`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_relay_core::cache::zone_name;
use ddns_relay_core::config::ProviderConfig;
use ddns_relay_core::traits::{DnsProvider, DnsRecord, ZoneInfo};
use ddns_relay_core::{Error, LookupCache, RecordType, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const PROVIDER: &str = "cloudflare";

/// Envelope every Cloudflare v4 response is wrapped in
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ApiZone {
    id: String,
    name: String,
}

/// A DNS record as the API returns it
#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    #[serde(default)]
    zone_id: Option<String>,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    proxied: Option<bool>,
}

impl ApiRecord {
    /// Convert to the core record shape; records other than A/AAAA yield `None`
    fn into_record(self, zone_id: &str) -> Option<DnsRecord> {
        let record_type = self.record_type.parse::<RecordType>().ok()?;
        Some(DnsRecord {
            id: self.id,
            zone_id: self.zone_id.unwrap_or_else(|| zone_id.to_string()),
            name: self.name,
            record_type,
            content: self.content,
            ttl: self.ttl,
            proxied: self.proxied,
        })
    }
}

/// Request payload for editing a record
///
/// See https://developers.cloudflare.com/api/operations/dns-records-for-a-zone-update-dns-record
#[derive(Debug, Serialize)]
struct RecordEdit<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    record_type: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxied: Option<bool>,
}

/// Cloudflare DNS provider
///
/// Stateless apart from the HTTP client: every lookup result is kept in the
/// [`LookupCache`] the coordinator passes in, so one drain never repeats a
/// zone or page request and nothing outlives the drain.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform all GET requests (zone lookup, record lookup)
/// - Log the intended PUT payload
/// - **NOT** actually modify DNS records
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API base URL, without a trailing slash
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip PUT updates
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider from configuration
    ///
    /// Fails if the token is empty or the HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let api_base = config
            .api_base
            .as_deref()
            .unwrap_or(CLOUDFLARE_API_BASE)
            .trim_end_matches('/')
            .to_string();

        if config.dry_run {
            tracing::warn!("Cloudflare provider running in DRY-RUN mode - no changes will be made");
        }

        Ok(Self {
            api_token: config.api_token.clone(),
            api_base,
            client,
            dry_run: config.dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Resolve the zone owning `hostname`, through the cache
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn find_zone(&self, cache: &mut LookupCache, hostname: &str) -> Result<Option<ZoneInfo>> {
        let zone_name = zone_name(hostname);
        if let Some(zone) = cache.zone(&zone_name) {
            tracing::debug!("Zone cache hit: {}", zone_name);
            return Ok(Some(zone.clone()));
        }

        tracing::debug!("Looking up zone ID for domain: {}", zone_name);
        let url = format!("{}/zones", self.api_base);
        let request = self
            .client
            .get(&url)
            .query(&[("name", zone_name.as_str())]);
        let (zones, _) = self.send::<Vec<ApiZone>>(request).await?;

        let Some(zone) = zones.into_iter().next() else {
            tracing::debug!("No zone found for: {}", zone_name);
            return Ok(None);
        };

        let zone = ZoneInfo {
            id: zone.id,
            name: zone.name,
        };
        cache.insert_zone(zone_name, zone.clone());
        Ok(Some(zone))
    }

    /// Fetch one page of records named `hostname`
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?name=a.example.com&page=1
    /// Authorization: Bearer <token>
    /// ```
    async fn list_records(
        &self,
        zone: &ZoneInfo,
        hostname: &str,
        page: u32,
    ) -> Result<(Vec<DnsRecord>, u32, u32)> {
        tracing::debug!("Fetching records for {} (page {})", hostname, page);
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone.id);
        let page_param = page.to_string();
        let request = self
            .client
            .get(&url)
            .query(&[("name", hostname), ("page", page_param.as_str())]);
        let (records, info) = self.send::<Vec<ApiRecord>>(request).await?;

        let records = records
            .into_iter()
            .filter_map(|r| r.into_record(&zone.id))
            .collect();

        // Without paging info the fetched page is the last one
        let (fetched, total) = match info {
            Some(info) => (info.page.max(page), info.total_pages),
            None => (page, page),
        };
        Ok((records, fetched, total))
    }

    /// Send an authorized request and unwrap the API envelope
    ///
    /// Transport failures map to `Error::Transport`, non-2xx answers to
    /// `Error::Upstream` and unparseable bodies to `Error::DnsProvider`.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(T, Option<ResultInfo>)> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Cloudflare request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read Cloudflare response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::upstream(
                PROVIDER,
                status.as_u16(),
                error_message(&body, status.canonical_reason().unwrap_or("error")),
            ));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            Error::dns_provider(format!("Invalid Cloudflare response format: {}", e))
        })?;

        if !envelope.success {
            return Err(Error::dns_provider(format!(
                "Cloudflare reported failure: {}",
                describe(&envelope.errors)
            )));
        }

        let result = envelope
            .result
            .ok_or_else(|| Error::dns_provider("Invalid Cloudflare response format: missing result"))?;
        Ok((result, envelope.result_info))
    }
}

/// Human-readable error text from a failed response body
fn error_message(body: &str, fallback: &str) -> String {
    match serde_json::from_str::<ApiResponse<serde_json::Value>>(body) {
        Ok(envelope) if !envelope.errors.is_empty() => describe(&envelope.errors),
        _ if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} ({})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn find_record(
        &self,
        cache: &mut LookupCache,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecord>> {
        if let Some(record) = cache.find_record(hostname, record_type) {
            tracing::debug!("Record cache hit: {} ({})", hostname, record_type);
            return Ok(Some(record.clone()));
        }

        loop {
            let page = {
                let pages = cache.pages_mut(hostname);
                if pages.exhausted() {
                    return Ok(None);
                }
                pages.next_page()
            };

            let Some(zone) = self.find_zone(cache, hostname).await? else {
                return Ok(None);
            };

            let (records, fetched, total) = self.list_records(&zone, hostname, page).await?;
            let found = records
                .iter()
                .find(|r| r.name == hostname && r.record_type == record_type)
                .cloned();
            cache.pages_mut(hostname).push_page(fetched, total, records);

            if found.is_some() {
                return Ok(found);
            }
        }
    }

    /// ```http
    /// PUT /zones/:zone_id/dns_records/:record_id
    /// {
    ///   "name": "a.example.com",
    ///   "type": "A",
    ///   "content": "1.2.3.4",
    ///   "ttl": 1,
    ///   "proxied": false
    /// }
    /// ```
    async fn update_record(
        &self,
        cache: &mut LookupCache,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, record.zone_id, record.id
        );
        let payload = RecordEdit {
            name: &record.name,
            record_type: record.record_type.as_str(),
            content,
            ttl: record.ttl,
            proxied: record.proxied,
        };

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PUT request to {} with payload: {}",
                url,
                serde_json::to_string(&payload)?
            );
            let updated = DnsRecord {
                content: content.to_string(),
                ..record.clone()
            };
            cache.refresh_record(&updated);
            return Ok(updated);
        }

        tracing::info!(
            "Updating Cloudflare DNS record: {} ({}) {} -> {}",
            record.name,
            record.record_type,
            record.content,
            content
        );

        let request = self.client.put(&url).json(&payload);
        let (result, _) = self.send::<ApiRecord>(request).await?;
        let updated = result.into_record(&record.zone_id).ok_or_else(|| {
            Error::dns_provider(format!(
                "Cloudflare returned an unsupported record type for {}",
                record.name
            ))
        })?;

        cache.refresh_record(&updated);
        Ok(updated)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str, dry_run: bool) -> ProviderConfig {
        ProviderConfig {
            api_token: token.to_string(),
            api_base: None,
            dry_run,
        }
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let err = CloudflareProvider::new(&config("", false)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_dry_run_mode() {
        let dry = CloudflareProvider::new(&config("token", true)).unwrap();
        let live = CloudflareProvider::new(&config("token", false)).unwrap();
        assert!(dry.is_dry_run());
        assert!(!live.is_dry_run());
    }

    #[test]
    fn test_api_base_override_drops_trailing_slash() {
        let mut cfg = config("token", false);
        cfg.api_base = Some("http://127.0.0.1:9999/client/v4/".to_string());
        let provider = CloudflareProvider::new(&cfg).unwrap();
        assert_eq!(provider.api_base, "http://127.0.0.1:9999/client/v4");

        let default = CloudflareProvider::new(&config("token", false)).unwrap();
        assert_eq!(default.api_base, CLOUDFLARE_API_BASE);
    }

    #[test]
    fn test_api_token_not_exposed_in_debug() {
        let provider = CloudflareProvider::new(&config("secret_token_12345", false)).unwrap();
        let debug_str = format!("{:?}", provider);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("CloudflareProvider"));
    }

    #[test]
    fn test_provider_name() {
        let provider = CloudflareProvider::new(&config("token", false)).unwrap();
        assert_eq!(provider.provider_name(), "cloudflare");
    }

    #[test]
    fn test_non_address_records_are_skipped() {
        let mx = ApiRecord {
            id: "1".into(),
            zone_id: None,
            name: "example.com".into(),
            record_type: "MX".into(),
            content: "mail.example.com".into(),
            ttl: Some(1),
            proxied: None,
        };
        assert!(mx.into_record("zone").is_none());

        let a = ApiRecord {
            id: "2".into(),
            zone_id: None,
            name: "a.example.com".into(),
            record_type: "A".into(),
            content: "1.2.3.4".into(),
            ttl: Some(1),
            proxied: Some(false),
        };
        let record = a.into_record("zone").unwrap();
        assert_eq!(record.zone_id, "zone");
        assert_eq!(record.record_type, RecordType::A);
    }

    #[test]
    fn test_error_message_prefers_api_errors() {
        let body = r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}],"result":null}"#;
        assert_eq!(error_message(body, "Forbidden"), "Authentication error (10000)");
        assert_eq!(error_message("", "Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message("upstream timeout", "Bad Gateway"), "upstream timeout");
    }

    #[tokio::test]
    async fn test_dry_run_update_only_touches_cache() {
        let mut cfg = config("token", true);
        // Nothing listens here; a real request would fail with a transport error
        cfg.api_base = Some("http://127.0.0.1:9".to_string());
        let provider = CloudflareProvider::new(&cfg).unwrap();

        let record = DnsRecord {
            id: "rec".into(),
            zone_id: "zone".into(),
            name: "a.example.com".into(),
            record_type: RecordType::A,
            content: "9.9.9.9".into(),
            ttl: Some(1),
            proxied: Some(false),
        };
        let mut cache = LookupCache::new();
        cache
            .pages_mut("a.example.com")
            .push_page(1, 1, vec![record.clone()]);

        let updated = provider
            .update_record(&mut cache, &record, "1.2.3.4")
            .await
            .unwrap();
        assert_eq!(updated.content, "1.2.3.4");
        assert_eq!(
            cache
                .find_record("a.example.com", RecordType::A)
                .map(|r| r.content.as_str()),
            Some("1.2.3.4")
        );
    }
}
