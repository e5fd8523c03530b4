//! Daemon configuration from the environment
//!
//! The relay configuration is JSON, given as a file path or inline. A few
//! variables override individual fields so secrets can stay out of the file.

use anyhow::{Context, Result, bail};
use ddns_relay_core::{NotifierConfig, RelayConfig, StoreConfig};
use std::net::SocketAddr;

/// Default listen address for the update front door
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Fully resolved daemon configuration
#[derive(Debug)]
pub struct DaemonConfig {
    pub relay: RelayConfig,
    pub listen: SocketAddr,
    pub log_level: String,
}

impl DaemonConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut relay = match (var("DDNS_RELAY_CONFIG"), var("DDNS_RELAY_CONFIG_JSON")) {
            (Some(path), _) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read DDNS_RELAY_CONFIG file {}", path))?;
                RelayConfig::from_json_str(&text)
                    .with_context(|| format!("Failed to parse {}", path))?
            }
            (None, Some(json)) => RelayConfig::from_json_str(&json)
                .context("Failed to parse DDNS_RELAY_CONFIG_JSON")?,
            (None, None) => bail!(
                "DDNS_RELAY_CONFIG or DDNS_RELAY_CONFIG_JSON is required. \
                Set it via: export DDNS_RELAY_CONFIG=/etc/ddns-relay/config.json"
            ),
        };

        if let Some(token) = var("DDNS_RELAY_CLOUDFLARE_TOKEN") {
            relay.provider.api_token = token;
        }
        if let Some(path) = var("DDNS_RELAY_STORE_PATH") {
            relay.store = StoreConfig::File { path };
        }
        if let Some(url) = var("DDNS_RELAY_WEBHOOK_URL") {
            relay.notifier = NotifierConfig::Webhook { url };
        }
        if let (Some(id), Some(token)) = (
            var("DDNS_RELAY_DISCORD_ID"),
            var("DDNS_RELAY_DISCORD_TOKEN"),
        ) {
            relay.notifier = NotifierConfig::Discord { id, token };
        }
        if var("DDNS_MODE").is_some_and(|mode| mode.eq_ignore_ascii_case("dry-run")) {
            relay.provider.dry_run = true;
        }

        let listen_var = var("DDNS_RELAY_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_var
            .parse()
            .with_context(|| format!("DDNS_RELAY_LISTEN is not a socket address: {}", listen_var))?;

        Ok(Self {
            relay,
            listen,
            log_level: var("DDNS_RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Beyond the relay's own checks this catches placeholder tokens and a
    /// file store whose directory is missing.
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;

        let token = &self.relay.provider.api_token;
        // Cloudflare API tokens are 40 characters
        if token.len() < 20 {
            bail!(
                "Cloudflare API token appears too short ({} chars). \
                Set it via: export DDNS_RELAY_CLOUDFLARE_TOKEN=your_token",
                token.len()
            );
        }

        let token_lower = token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower.contains("example")
        {
            bail!(
                "Cloudflare API token appears to be a placeholder. \
                Use an actual API token with Zone:DNS:Edit permissions."
            );
        }

        if let StoreConfig::File { path } = &self.relay.store {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    bail!(
                        "Store directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => bail!(
                "DDNS_RELAY_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}
