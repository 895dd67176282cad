//! Row types shared by all storage backends.
//!
//! Metric history is append-only: rows are written once and never mutated.
//! Alert rows are written on breach and touched exactly twice afterwards at
//! most (suppression bumps while pending, then the notification outcome).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::Chain;
use crate::catalog::{MetricName, Operator, Severity};
use crate::MetricSample;

/// One persisted metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub id: i64,
    pub asset_symbol: String,
    pub metric: MetricName,
    pub value: f64,
    pub chain: Option<Chain>,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricRow {
    pub fn into_sample(self) -> MetricSample {
        MetricSample {
            asset_symbol: self.asset_symbol,
            metric: self.metric,
            value: self.value,
            chain: self.chain,
            metadata: self.metadata,
            recorded_at: self.recorded_at,
        }
    }

    /// TVL weight carried in per-market lending samples, used by the
    /// scoring engine to aggregate across markets. Defaults to 1.0 so a
    /// sample without the field still participates.
    pub fn market_tvl_weight(&self) -> f64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("market_tvl_usd"))
            .and_then(|v| v.as_f64())
            .filter(|v| *v > 0.0)
            .unwrap_or(1.0)
    }
}

/// One registered asset, with its configuration document stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRow {
    pub symbol: String,
    pub name: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A threshold breach waiting to be written.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub asset_symbol: String,
    pub metric: MetricName,
    pub value: f64,
    pub threshold_value: f64,
    pub operator: Operator,
    pub severity: Severity,
    pub message: String,
    pub chain: Option<Chain>,
    pub triggered_at: DateTime<Utc>,
}

/// One persisted alert.
///
/// Lifecycle: created on breach (pending) → notified, or failed once the
/// delivery retry cap is exhausted. `suppressed_count` accumulates breaches
/// that were skipped inside the suppression window while this alert was the
/// tuple's most recent unnotified row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,
    pub asset_symbol: String,
    pub metric: MetricName,
    pub value: f64,
    pub threshold_value: f64,
    pub operator: Operator,
    pub severity: Severity,
    pub message: String,
    pub chain: Option<Chain>,
    pub suppressed_count: u32,
    pub notified: bool,
    pub notification_channel: Option<String>,
    pub delivery_attempts: u32,
    pub failure_reason: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl AlertRow {
    pub fn is_pending(&self) -> bool {
        !self.notified && self.failure_reason.is_none()
    }
}
