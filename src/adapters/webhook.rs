//! Webhook alert transport
//!
//! Posts alerts as JSON to a configured HTTP endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AlertsConfig;
use crate::error::{Result, WardenError};
use crate::supervisor::{Alert, AlertSink};

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    webhook_url: String,
    host: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    host: &'a str,
    category: &'a str,
    severity: &'a str,
    title: &'a str,
    body: &'a str,
    text: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

impl WebhookSink {
    /// Create a webhook sink from configuration, if a URL is set
    pub fn from_config(config: &AlertsConfig) -> Result<Option<Arc<Self>>> {
        match config.webhook_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                info!("Webhook alert delivery enabled");
                Ok(Some(Self::new(
                    url,
                    Duration::from_secs(config.delivery_timeout_secs.max(1)),
                )?))
            }
            _ => Ok(None),
        }
    }

    /// Create a new webhook sink with explicit URL
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder().timeout(timeout).build()?;
        let host = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
        Ok(Arc::new(Self {
            client,
            webhook_url: webhook_url.to_string(),
            host,
        }))
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let payload = WebhookPayload {
            host: &self.host,
            category: &alert.category,
            severity: alert.level.as_str(),
            title: &alert.title,
            body: &alert.message,
            text: alert.format_text(),
            timestamp: alert.timestamp.to_rfc3339(),
            metadata: alert.metadata.as_ref(),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Webhook notification sent successfully");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(WardenError::AlertDelivery(format!("HTTP {status}: {body}")))
        }
    }
}
