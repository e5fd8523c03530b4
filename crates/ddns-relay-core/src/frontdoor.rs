//! Update front door
//!
//! Protocol logic for the dyndns-style `/nic/update` endpoint. The daemon's
//! HTTP listener hands over the request path, query string and
//! `Authorization` header and writes back the returned status and body.
//!
//! ## Request
//!
//! ```text
//! GET /nic/update?hostname=a.example.com,b.example.com&myip=1.2.3.4,2001:db8::1
//! Authorization: Basic base64(username:password)
//! ```
//!
//! ## Response
//!
//! - `404` with body `404` for any other path
//! - `badauth` when the credentials are unreadable or do not unlock every
//!   listed hostname
//! - otherwise one `good <ips>` line per hostname; provider application
//!   happens later, in a drain

use crate::config::{NameConfig, RecordType};
use crate::pending::{PendingUpdate, PendingUpdateSet};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, error, info, warn};

/// Path of the update endpoint
pub const UPDATE_PATH: &str = "/nic/update";

/// Status and body to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResponse {
    pub status: u16,
    pub body: String,
}

impl UpdateResponse {
    fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: "404".to_string(),
        }
    }

    fn badauth() -> Self {
        Self::ok("badauth")
    }

    /// dyndns "server error" code
    fn server_error() -> Self {
        Self {
            status: 500,
            body: "911".to_string(),
        }
    }
}

/// Accepts update requests and records them as pending updates
pub struct FrontDoor {
    names: BTreeMap<String, NameConfig>,
    pending: PendingUpdateSet,
}

impl FrontDoor {
    pub fn new(names: BTreeMap<String, NameConfig>, pending: PendingUpdateSet) -> Self {
        Self { names, pending }
    }

    /// Handle one request
    ///
    /// Never waits for the provider: the response only confirms that the
    /// updates and a drain trigger were committed.
    pub async fn handle(
        &self,
        path: &str,
        query: Option<&str>,
        authorization: Option<&str>,
    ) -> UpdateResponse {
        if path != UPDATE_PATH {
            debug!("No route for {}", path);
            return UpdateResponse::not_found();
        }

        let Some((username, password)) = parse_basic_auth(authorization) else {
            debug!("Unreadable Authorization header");
            return UpdateResponse::badauth();
        };

        let hostname_param = query_param(query, "hostname").unwrap_or_default();
        let myip_param = query_param(query, "myip").unwrap_or_default();

        // An empty parameter still yields one (unknown) hostname, so it is rejected too.
        let hostnames: Vec<&str> = hostname_param.split(',').collect();
        let mut names = Vec::with_capacity(hostnames.len());
        for hostname in &hostnames {
            match self.names.get(*hostname) {
                Some(name) if name.allows(&username, &password) => names.push((*hostname, name)),
                _ => {
                    info!("Rejected update for {:?} by user {:?}", hostname, username);
                    return UpdateResponse::badauth();
                }
            }
        }

        let (ipv4, ipv6) = parse_myip(&myip_param);
        let updates = pending_updates(&names, ipv4, ipv6);

        let ips: Vec<String> = ipv4
            .map(|ip| ip.to_string())
            .into_iter()
            .chain(ipv6.map(|ip| ip.to_string()))
            .collect();
        let line = format!("good {}", ips.join(","));
        let body = vec![line; hostnames.len()].join("\n");

        if updates.is_empty() {
            warn!(
                "Update for {} carries no usable address (myip={:?})",
                hostname_param, myip_param
            );
            return UpdateResponse::ok(body);
        }

        if let Err(e) = self.pending.record(&updates).await {
            error!("Failed to record updates for {}: {}", hostname_param, e);
            return UpdateResponse::server_error();
        }

        info!(
            "Accepted update for {} ({} pending record(s))",
            hostname_param,
            updates.len()
        );
        UpdateResponse::ok(body)
    }
}

/// Decode an `Authorization: Basic` header into (username, password)
///
/// A missing header reads as empty credentials. Returns `None` for other
/// schemes, invalid base64, non-UTF-8 or a missing `:` separator.
pub fn parse_basic_auth(header: Option<&str>) -> Option<(String, String)> {
    let Some(header) = header else {
        return Some((String::new(), String::new()));
    };

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;

    Some((username.to_string(), password.to_string()))
}

/// First value of a query parameter
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// First IPv4 and first IPv6 address in a comma-separated `myip` value
pub fn parse_myip(myip: &str) -> (Option<Ipv4Addr>, Option<Ipv6Addr>) {
    let candidates = || myip.split(',').map(str::trim);
    (
        candidates().find_map(|v| v.parse().ok()),
        candidates().find_map(|v| v.parse().ok()),
    )
}

/// Expand validated hostnames into the records they update
fn pending_updates(
    names: &[(&str, &NameConfig)],
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
) -> Vec<PendingUpdate> {
    let mut updates = Vec::new();

    for (hostname, name) in names {
        if let Some(ip) = ipv4 {
            if name.records.contains(&RecordType::A) {
                updates.push(PendingUpdate::new(*hostname, RecordType::A, ip.to_string()));
            }
            if let Some(alt) = &name.v4alt {
                updates.push(PendingUpdate::new(alt.as_str(), RecordType::A, ip.to_string()));
            }
        }
        if let Some(ip) = ipv6 {
            if name.records.contains(&RecordType::AAAA) {
                updates.push(PendingUpdate::new(*hostname, RecordType::AAAA, ip.to_string()));
            }
            if let Some(alt) = &name.v6alt {
                updates.push(PendingUpdate::new(alt.as_str(), RecordType::AAAA, ip.to_string()));
            }
        }
    }

    updates
}
