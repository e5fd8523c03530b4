// # Webhook Notifier
//
// This crate posts drain summaries and lock alerts to a chat webhook
// (Discord or anything accepting the same `{"content": "..."}` body).
//
// ## Delivery Model
//
// - ✅ Fire-and-forget: `notify` spawns the POST and returns immediately
// - ✅ Delivery errors are logged, never returned to the coordinator
// - ✅ Messages over the webhook limit are truncated
// - ❌ NO retries (a lost summary is not worth delaying the next drain)
//
// ## Security Requirements
//
// - The webhook URL embeds a secret token and NEVER appears in logs

use ddns_relay_core::traits::Notifier;
use ddns_relay_core::{Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Discord webhook endpoint prefix
const DISCORD_WEBHOOK_BASE: &str = "https://discord.com/api/webhooks";

/// Longest message the webhook accepts, in characters
pub const MAX_CONTENT_CHARS: usize = 2000;

const TRUNCATION_MARKER: &str = "...";

/// Default HTTP timeout for webhook calls (10 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Notifier that posts each message to a webhook URL
#[derive(Clone)]
pub struct WebhookNotifier {
    /// ⚠️ Contains the webhook token, NEVER log this value
    url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &"<REDACTED>")
            .finish()
    }
}

impl WebhookNotifier {
    /// Create a notifier posting to a full webhook URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(Error::config("Webhook URL must use HTTP or HTTPS scheme"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { url, client })
    }

    /// Create a notifier for a Discord webhook id and token
    pub fn discord(id: &str, token: &str) -> Result<Self> {
        if id.is_empty() || token.is_empty() {
            return Err(Error::config("Discord webhook id and token are required"));
        }
        Self::new(format!("{}/{}/{}", DISCORD_WEBHOOK_BASE, id, token))
    }

    /// Post one message and wait for the answer
    pub async fn send(&self, message: &str) -> Result<()> {
        let content = truncate(message);
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { content: &content })
            .send()
            .await
            .map_err(|e| Error::notifier(format!("Webhook request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notifier(format!("Webhook returned HTTP {}", status)));
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, webhook message dropped");
            return;
        };

        let notifier = self.clone();
        let message = message.to_string();
        runtime.spawn(async move {
            match notifier.send(&message).await {
                Ok(()) => tracing::debug!("Webhook message delivered"),
                Err(e) => tracing::warn!("Webhook delivery failed: {}", e),
            }
        });
    }
}

/// Cut a message down to the webhook limit on a character boundary
fn truncate(message: &str) -> std::borrow::Cow<'_, str> {
    if message.chars().count() <= MAX_CONTENT_CHARS {
        return std::borrow::Cow::Borrowed(message);
    }
    let keep = MAX_CONTENT_CHARS - TRUNCATION_MARKER.len();
    let mut cut: String = message.chars().take(keep).collect();
    cut.push_str(TRUNCATION_MARKER);
    std::borrow::Cow::Owned(cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_short_messages_are_untouched() {
        let message = "Updated:\na.example.com (A) to 1.2.3.4";
        assert_eq!(truncate(message), message);
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 10);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), MAX_CONTENT_CHARS);
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_url_validation() {
        assert!(WebhookNotifier::new("ftp://example.com/hook").is_err());
        assert!(WebhookNotifier::discord("", "token").is_err());
        let discord = WebhookNotifier::discord("123", "abc").unwrap();
        assert_eq!(discord.url, "https://discord.com/api/webhooks/123/abc");
    }

    #[test]
    fn test_url_not_exposed_in_debug() {
        let notifier = WebhookNotifier::discord("123", "secret-token").unwrap();
        assert!(!format!("{:?}", notifier).contains("secret-token"));
    }

    #[test]
    fn test_notify_without_runtime_does_not_panic() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        notifier.notify("Nothing to update");
    }

    #[tokio::test]
    async fn test_notify_posts_content_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            // Read until the JSON body is complete
            while !buf.ends_with(b"}") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
        });

        let notifier = WebhookNotifier::new(url).unwrap();
        notifier.notify("Updated:\na.example.com (A) to 1.2.3.4");

        let request = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(request.starts_with("POST /hook HTTP/1.1"));
        let body = request.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "content": "Updated:\na.example.com (A) to 1.2.3.4" })
        );
    }
}
