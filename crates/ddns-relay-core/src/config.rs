//! Configuration types for the DDNS relay
//!
//! This module defines all configuration structures used throughout the crate.
//! Every section has serde defaults so a minimal config only needs `names`
//! and the provider token.

use crate::backoff::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Hostnames clients may update, keyed by hostname
    #[serde(default)]
    pub names: BTreeMap<String, NameConfig>,

    /// Coordinator and dispatcher settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// DNS provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Where drain summaries go
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl RelayConfig {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.names.is_empty() {
            return Err(crate::Error::config("No names configured"));
        }

        for (hostname, name) in &self.names {
            validate_hostname(hostname)?;
            name.validate(hostname)?;
        }

        self.coordinator.validate()?;
        self.store.validate()?;
        self.provider.validate()?;
        self.notifier.validate()?;

        Ok(())
    }
}

/// Per-hostname configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameConfig {
    /// Record types updated on the hostname itself
    #[serde(default)]
    pub records: Vec<RecordType>,

    /// Additional hostname whose A record follows this name's IPv4 address
    #[serde(default)]
    pub v4alt: Option<String>,

    /// Additional hostname whose AAAA record follows this name's IPv6 address
    #[serde(default)]
    pub v6alt: Option<String>,

    /// Credentials allowed to update this hostname
    #[serde(default)]
    pub auth: Vec<Credential>,
}

impl NameConfig {
    fn validate(&self, hostname: &str) -> Result<(), crate::Error> {
        if self.records.is_empty() && self.v4alt.is_none() && self.v6alt.is_none() {
            return Err(crate::Error::config(format!(
                "Name {} updates no records (set records, v4alt or v6alt)",
                hostname
            )));
        }
        if self.auth.is_empty() {
            return Err(crate::Error::config(format!(
                "Name {} has no credentials",
                hostname
            )));
        }
        for alt in [&self.v4alt, &self.v6alt].into_iter().flatten() {
            validate_hostname(alt)?;
        }
        Ok(())
    }

    /// Whether the given credentials may update this name
    pub fn allows(&self, username: &str, password: &str) -> bool {
        self.auth
            .iter()
            .any(|c| c.username == username && c.password == password)
    }
}

/// Basic-auth credentials accepted for a hostname
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// A record (IPv4)
    A,
    /// AAAA record (IPv6)
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            other => Err(crate::Error::invalid_input(format!(
                "unsupported record type: {}",
                other
            ))),
        }
    }
}

/// Coordinator and dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Backoff between retry drains
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Maximum optimistic-commit attempts before a conflict is surfaced
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    /// How many times a queue message is delivered before it is dropped
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// Delay before a message whose handler failed is delivered again
    #[serde(default = "default_redelivery_delay_secs")]
    pub redelivery_delay_secs: u64,

    /// Alert when the run lock is held without a heartbeat for this long
    ///
    /// Must exceed the largest retry delay, since the lock is legitimately
    /// held across a retry chain.
    #[serde(default = "default_lock_alert_after_secs")]
    pub lock_alert_after_secs: u64,

    /// How often the lock watchdog checks the run lock
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// How often a running drain refreshes the lock heartbeat
    ///
    /// Checked between entries, so a single slow provider call can still
    /// stretch the gap. Must stay below `lock_alert_after_secs`.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Capacity of the dispatcher event channel
    ///
    /// When full, events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl CoordinatorConfig {
    /// Validate the coordinator configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.retry.validate()?;
        if self.conflict_retries == 0 {
            return Err(crate::Error::config("conflict_retries must be > 0"));
        }
        if self.max_deliveries == 0 {
            return Err(crate::Error::config("max_deliveries must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        if self.watchdog_interval_secs == 0 {
            return Err(crate::Error::config("watchdog_interval_secs must be > 0"));
        }
        if self.lock_alert_after() <= self.retry.max_delay() {
            return Err(crate::Error::config(format!(
                "lock_alert_after_secs ({}) must exceed the largest retry delay ({}s)",
                self.lock_alert_after_secs,
                self.retry.max_delay().as_secs()
            )));
        }
        if self.heartbeat_interval() >= self.lock_alert_after() {
            return Err(crate::Error::config(format!(
                "heartbeat_interval_secs ({}) must be below lock_alert_after_secs ({})",
                self.heartbeat_interval_secs, self.lock_alert_after_secs
            )));
        }
        Ok(())
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_secs(self.redelivery_delay_secs)
    }

    pub fn lock_alert_after(&self) -> Duration {
        Duration::from_secs(self.lock_alert_after_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            conflict_retries: default_conflict_retries(),
            max_deliveries: default_max_deliveries(),
            redelivery_delay_secs: default_redelivery_delay_secs(),
            lock_alert_after_secs: default_lock_alert_after_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_conflict_retries() -> usize {
    32
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_redelivery_delay_secs() -> u64 {
    10
}

fn default_lock_alert_after_secs() -> u64 {
    900
}

fn default_watchdog_interval_secs() -> u64 {
    60
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Durable store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// File-backed store
    File {
        /// Path to the store file
        path: String,
    },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Cloudflare provider configuration
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Cloudflare API token with Zone:DNS:Edit permissions
    #[serde(default)]
    pub api_token: String,

    /// API base URL override (defaults to the public v4 API)
    #[serde(default)]
    pub api_base: Option<String>,

    /// Perform lookups but never write records
    #[serde(default)]
    pub dry_run: bool,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.api_token.is_empty() {
            return Err(crate::Error::config("Cloudflare API token cannot be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Notifier configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Write summaries to the log only
    #[default]
    Log,

    /// Post summaries to a chat webhook
    Webhook {
        /// Full webhook URL
        url: String,
    },

    /// Post summaries to a Discord webhook given by id and token
    Discord {
        /// Webhook id
        id: String,
        /// Webhook token
        token: String,
    },
}

impl fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifierConfig::Log => f.write_str("Log"),
            NotifierConfig::Webhook { .. } => f
                .debug_struct("Webhook")
                .field("url", &"<REDACTED>")
                .finish(),
            NotifierConfig::Discord { id, .. } => f
                .debug_struct("Discord")
                .field("id", id)
                .field("token", &"<REDACTED>")
                .finish(),
        }
    }
}

impl NotifierConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NotifierConfig::Webhook { url }
                if !url.starts_with("https://") && !url.starts_with("http://") =>
            {
                Err(crate::Error::config(format!(
                    "Webhook URL must use HTTP or HTTPS scheme. Got: {}",
                    url
                )))
            }
            NotifierConfig::Discord { id, token } if id.is_empty() || token.is_empty() => Err(
                crate::Error::config("Discord notifier requires both id and token"),
            ),
            _ => Ok(()),
        }
    }
}

/// Validate that a string is a usable DNS hostname
///
/// Basic RFC 1035 checks; catches common typos rather than being exhaustive.
pub fn validate_hostname(hostname: &str) -> Result<(), crate::Error> {
    if hostname.is_empty() {
        return Err(crate::Error::config("Hostname cannot be empty"));
    }

    if hostname.len() > 253 {
        return Err(crate::Error::config(format!(
            "Hostname too long: {} chars (max 253). Got: {}",
            hostname.len(),
            hostname
        )));
    }

    for label in hostname.split('.') {
        if label.is_empty() {
            return Err(crate::Error::config(format!(
                "Hostname has empty label: '{}'",
                hostname
            )));
        }
        if label.len() > 63 {
            return Err(crate::Error::config(format!(
                "Hostname label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::config(format!(
                "Hostname label contains invalid characters. Label: '{}'",
                label
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::config(format!(
                "Hostname label cannot start or end with hyphen. Label: '{}'",
                label
            )));
        }
    }

    Ok(())
}
