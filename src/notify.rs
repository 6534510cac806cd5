//! Human-facing alerts for deploy failures and automatic rollbacks.

use crate::config::AlertingConfig;
use crate::error::{Result, RolloutError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert. Delivery problems are logged, never returned.
    async fn notify(&self, severity: Severity, title: &str, message: &str, details: serde_json::Value);
}

/// Alert body posted to webhooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Notifier that logs every alert, suppresses repeats within a
/// per-severity cooldown and posts JSON to the configured webhooks
pub struct AlertingNotifier {
    client: Client,
    webhook_urls: Vec<String>,
    cooldowns: DashMap<String, DateTime<Utc>>,
    critical_cooldown: ChronoDuration,
    warning_cooldown: ChronoDuration,
    info_cooldown: ChronoDuration,
}

impl AlertingNotifier {
    pub fn new(config: &AlertingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs))
            .build()
            .map_err(|e| RolloutError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_urls: config.webhook_urls.clone(),
            cooldowns: DashMap::new(),
            critical_cooldown: ChronoDuration::minutes(config.cooldown_critical_mins),
            warning_cooldown: ChronoDuration::minutes(config.cooldown_warning_mins),
            info_cooldown: ChronoDuration::minutes(config.cooldown_info_mins),
        })
    }

    fn cooldown(&self, severity: Severity) -> ChronoDuration {
        match severity {
            Severity::Critical => self.critical_cooldown,
            Severity::Warning => self.warning_cooldown,
            Severity::Info => self.info_cooldown,
        }
    }

    /// Stable id for deduplication: same severity, title and message
    fn alert_id(severity: Severity, title: &str, message: &str) -> String {
        let digest = Sha256::digest(format!("{}\n{}\n{}", severity, title, message).as_bytes());
        format!("{:x}", digest)[..16].to_string()
    }

    /// Record a send at `now` unless one happened within the cooldown.
    /// Returns false when the alert should be suppressed.
    fn claim(&self, alert_id: &str, severity: Severity, now: DateTime<Utc>) -> bool {
        self.prune(now);
        let cooldown = self.cooldown(severity);
        let mut entry = self.cooldowns.entry(alert_id.to_string()).or_insert(DateTime::<Utc>::MIN_UTC);
        if now < *entry + cooldown {
            return false;
        }
        *entry = now;
        true
    }

    /// Forget sends older than the longest cooldown; they can no longer suppress anything
    fn prune(&self, now: DateTime<Utc>) {
        let longest = self
            .critical_cooldown
            .max(self.warning_cooldown)
            .max(self.info_cooldown);
        self.cooldowns.retain(|_, sent| now < *sent + longest);
    }

    async fn post_webhooks(&self, alert: &Alert) {
        for url in &self.webhook_urls {
            match self.client.post(url).json(alert).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Alert {} delivered to {}", alert.alert_id, url);
                }
                Ok(response) => {
                    warn!(
                        "Webhook {} rejected alert {}: HTTP {}",
                        url,
                        alert.alert_id,
                        response.status()
                    );
                }
                Err(e) => {
                    error!("Failed to deliver alert {} to {}: {}", alert.alert_id, url, e);
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for AlertingNotifier {
    async fn notify(&self, severity: Severity, title: &str, message: &str, details: serde_json::Value) {
        let alert_id = Self::alert_id(severity, title, message);
        let now = Utc::now();

        if !self.claim(&alert_id, severity, now) {
            debug!("Alert {} suppressed due to cooldown", alert_id);
            return;
        }

        match severity {
            Severity::Info => info!("ALERT [{}] {}: {}", severity, title, message),
            _ => warn!("ALERT [{}] {}: {}", severity, title, message),
        }

        let alert = Alert {
            alert_id,
            severity,
            title: title.to_string(),
            message: message.to_string(),
            details,
            timestamp: now,
        };
        self.post_webhooks(&alert).await;
    }
}
