//! Per-drain provider lookup cache
//!
//! A `LookupCache` lives for exactly one coordinator invocation. Providers fill
//! it while resolving records so that several entries in one drain do not
//! repeat the same zone or record-page requests. It is dropped when the drain
//! ends and is never shared between drains.

use crate::config::RecordType;
use crate::traits::{DnsRecord, ZoneInfo};
use std::collections::HashMap;

/// Records fetched so far for one hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPages {
    /// Number of the last page fetched (0 = none yet)
    pub fetched_pages: u32,
    /// Total pages the provider reported (1 until the first fetch)
    pub total_pages: u32,
    /// Every record seen on fetched pages
    pub records: Vec<DnsRecord>,
}

impl RecordPages {
    fn new() -> Self {
        Self {
            fetched_pages: 0,
            total_pages: 1,
            records: Vec::new(),
        }
    }

    /// Whether every page has been fetched
    pub fn exhausted(&self) -> bool {
        self.fetched_pages >= self.total_pages
    }

    /// Next page number to fetch
    pub fn next_page(&self) -> u32 {
        self.fetched_pages + 1
    }

    /// Record a fetched page
    pub fn push_page(&mut self, page: u32, total_pages: u32, records: Vec<DnsRecord>) {
        self.records.extend(records);
        self.fetched_pages = page;
        self.total_pages = total_pages;
    }

    /// Cached record with exactly this name and type
    pub fn find(&self, hostname: &str, record_type: RecordType) -> Option<&DnsRecord> {
        self.records
            .iter()
            .find(|r| r.name == hostname && r.record_type == record_type)
    }
}

/// Zone and record-page cache scoped to one drain
#[derive(Debug, Default)]
pub struct LookupCache {
    zones: HashMap<String, ZoneInfo>,
    records: HashMap<String, RecordPages>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached zone for a zone name
    pub fn zone(&self, zone_name: &str) -> Option<&ZoneInfo> {
        self.zones.get(zone_name)
    }

    pub fn insert_zone(&mut self, zone_name: impl Into<String>, zone: ZoneInfo) {
        self.zones.insert(zone_name.into(), zone);
    }

    /// Page state for a hostname, created empty on first use
    pub fn pages_mut(&mut self, hostname: &str) -> &mut RecordPages {
        self.records
            .entry(hostname.to_string())
            .or_insert_with(RecordPages::new)
    }

    /// Cached record with exactly this name and type
    pub fn find_record(&self, hostname: &str, record_type: RecordType) -> Option<&DnsRecord> {
        self.records
            .get(hostname)
            .and_then(|pages| pages.find(hostname, record_type))
    }

    /// Replace the cached copy of a record after the provider changed it
    pub fn refresh_record(&mut self, record: &DnsRecord) {
        if let Some(pages) = self.records.get_mut(&record.name) {
            match pages.records.iter_mut().find(|r| r.id == record.id) {
                Some(cached) => *cached = record.clone(),
                None => pages.records.push(record.clone()),
            }
        }
    }
}

/// Zone name a hostname is looked up under: its last two labels
///
/// `"a.b.example.com"` → `"example.com"`. Hostnames with fewer than two
/// labels are returned unchanged.
pub fn zone_name(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}
