// src/services/notifier.rs
use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Slack incoming-webhook sink. Without a webhook url every send is a no-op,
/// so callers never branch on whether notifications are configured.
pub struct SlackNotifier {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("cannot build notifier http client")?;
        Ok(Self { webhook_url, http })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            debug!(%text, "notification skipped, no webhook configured");
            return Ok(());
        };
        self.http
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("slack webhook request failed")?
            .error_for_status()
            .context("slack webhook rejected the message")?;
        Ok(())
    }
}
