//! Notifier: drains pending alerts and hands them to a transport.
//!
//! The envelope format is the stable contract; how a channel renders it
//! (Telegram, Slack, plain webhook) is the transport's business. Delivery
//! failures classified retriable leave the alert pending for the next
//! drain; after the retry cap the alert is marked permanently failed with
//! a reason code.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::storage::{AlertRow, StorageBackend, StorageError};

/// What a transport receives for one alert.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEnvelope {
    pub severity: String,
    pub asset: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: String,
    /// ISO-8601, UTC.
    pub triggered_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed_count: Option<u32>,
}

impl AlertEnvelope {
    pub fn from_alert(alert: &AlertRow) -> Self {
        Self {
            severity: alert.severity.to_string(),
            asset: alert.asset_symbol.clone(),
            metric: alert.metric.to_string(),
            value: alert.value,
            threshold: alert.threshold_value,
            operator: alert.operator.to_string(),
            triggered_at: alert.triggered_at.to_rfc3339(),
            chain: alert.chain.map(|c| c.to_string()),
            suppressed_count: (alert.suppressed_count > 0).then_some(alert.suppressed_count),
        }
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// Worth retrying on the next drain.
    Retriable(String),
    /// Will never succeed; fail the alert immediately.
    Terminal(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Retriable(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Retriable(msg) => write!(f, "transport failure (retriable): {msg}"),
            TransportError::Terminal(msg) => write!(f, "transport failure (terminal): {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Channel name recorded on successfully notified alerts.
    fn channel(&self) -> &str;

    async fn deliver(&self, envelope: &AlertEnvelope) -> Result<(), TransportError>;
}

/// Posts the envelope as JSON to a webhook endpoint.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Terminal(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, envelope: &AlertEnvelope) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| TransportError::Retriable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 429 || status.is_server_error() {
            Err(TransportError::Retriable(format!(
                "webhook returned {status}"
            )))
        } else {
            Err(TransportError::Terminal(format!(
                "webhook returned {status}"
            )))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DrainOutcome {
    pub delivered: usize,
    pub deferred: usize,
    pub failed: usize,
}

pub struct Notifier {
    backend: Arc<dyn StorageBackend>,
    transport: Arc<dyn AlertTransport>,
    retry_cap: u32,
    batch_size: usize,
}

impl Notifier {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        transport: Arc<dyn AlertTransport>,
        retry_cap: u32,
    ) -> Self {
        Self {
            backend,
            transport,
            retry_cap,
            batch_size: 100,
        }
    }

    /// Deliver every pending alert once. Called at the critical cadence.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainOutcome, StorageError> {
        let pending = self.backend.pending_alerts(self.batch_size).await?;
        let mut outcome = DrainOutcome::default();

        if pending.is_empty() {
            return Ok(outcome);
        }

        debug!("draining {} pending alerts", pending.len());

        for alert in pending {
            let envelope = AlertEnvelope::from_alert(&alert);

            match self.transport.deliver(&envelope).await {
                Ok(()) => {
                    self.backend
                        .mark_alert_notified(alert.id, self.transport.channel())
                        .await?;
                    outcome.delivered += 1;
                    info!(
                        alert = alert.id,
                        severity = %alert.severity,
                        "alert delivered via {}",
                        self.transport.channel()
                    );
                }
                Err(err) if err.is_retriable() => {
                    let attempts = self.backend.record_delivery_attempt(alert.id).await?;
                    if attempts >= self.retry_cap {
                        self.backend
                            .mark_alert_failed(alert.id, "delivery retry cap exhausted")
                            .await?;
                        outcome.failed += 1;
                        warn!(
                            alert = alert.id,
                            attempts, "alert permanently failed after retry cap"
                        );
                    } else {
                        outcome.deferred += 1;
                        debug!(
                            alert = alert.id,
                            attempts, "delivery deferred to next drain: {err}"
                        );
                    }
                }
                Err(err) => {
                    self.backend
                        .mark_alert_failed(alert.id, &err.to_string())
                        .await?;
                    outcome.failed += 1;
                    warn!(alert = alert.id, "alert permanently failed: {err}");
                }
            }
        }

        Ok(outcome)
    }
}
