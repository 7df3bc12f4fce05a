//! Webhook error notifications, throttled per category so a flapping
//! provider produces one summary per interval instead of a flood.

use crate::config::NotifyConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct NotifyPayload<'a> {
    category: &'a str,
    severity: &'static str,
    summary: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Posts error summaries to a configured webhook. A `None` URL disables
/// notification entirely; every call is then a no-op.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    min_interval: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
            min_interval: Duration::from_secs(config.min_interval_secs),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Send one summary for `category`, unless one went out within the
    /// configured interval. Delivery failures are logged and swallowed;
    /// notification must never take the pipeline down.
    pub async fn notify(&self, category: &str, summary: &str) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        {
            let mut last_sent = self.last_sent.lock().await;
            if let Some(last) = last_sent.get(category) {
                if last.elapsed() < self.min_interval {
                    tracing::debug!(category, "notification throttled");
                    return;
                }
            }
            last_sent.insert(category.to_string(), Instant::now());
        }

        let payload = NotifyPayload {
            category,
            severity: severity_of(category),
            summary,
            timestamp: chrono::Utc::now(),
        };
        let result = self.client.post(url).json(&payload).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                tracing::warn!(category, %status, "webhook rejected notification");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(category, %error, "webhook notification failed");
            }
        }
    }
}

/// Categories that mean the bot cannot answer at all rank as critical.
fn severity_of(category: &str) -> &'static str {
    match category {
        "provider_unavailable" | "store_unavailable" => "critical",
        _ => "warning",
    }
}
