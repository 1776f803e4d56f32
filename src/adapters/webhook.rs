//! Alert webhook notifications
//!
//! POSTs a JSON alert body to a configured URL. Best effort: non-2xx and
//! timeouts are reported back to the dispatcher, never retried here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::{AlertEvent, Severity};
use crate::error::{Result, SupervisorError};
use crate::supervisor::alert_manager::AlertSink;

/// JSON body sent to the webhook
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub timestamp: DateTime<Utc>,
    pub hostname: &'a str,
    pub service: &'a str,
    pub severity: Severity,
    pub message: &'a str,
    pub restart_count: u32,
}

/// Webhook alert sink
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    webhook_url: String,
    hostname: String,
}

impl WebhookSink {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
            hostname: local_hostname(),
        })
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.webhook_url
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let payload = WebhookPayload {
            timestamp: event.timestamp,
            hostname: &self.hostname,
            service: &event.service,
            severity: event.severity,
            message: &event.message,
            restart_count: event.restart_count,
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Webhook alert for {} delivered", event.service);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(SupervisorError::AlertSink {
                sink: "webhook".to_string(),
                reason: format!("HTTP {}: {}", status, body),
            })
        }
    }
}

/// Host name reported in alerts
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            let name = name.to_string_lossy().trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = WebhookPayload {
            timestamp: ts,
            hostname: "host-1",
            service: "web",
            severity: Severity::Critical,
            message: "restart limit exhausted",
            restart_count: 3,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["hostname"], "host-1");
        assert_eq!(json["service"], "web");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["restart_count"], 3);
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_local_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
