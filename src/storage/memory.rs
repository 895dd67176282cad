//! In-memory storage backend.
//!
//! No persistence; rows live in vectors behind a single async lock. Used by
//! tests and local experiments, and doubles as the reference semantics for
//! the latest-wins views.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, AssetRow, MetricRow, NewAlert};
use crate::catalog::{MetricName, ThresholdRule};
use crate::MetricSample;

#[derive(Default)]
struct Inner {
    metrics: Vec<MetricRow>,
    next_metric_id: i64,
    assets: HashMap<String, AssetRow>,
    thresholds: Vec<ThresholdRule>,
    next_threshold_id: i64,
    alerts: Vec<AlertRow>,
    next_alert_id: i64,
    /// Simulates a storage outage when set; every operation fails.
    unavailable: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the backend into (or out of) a simulated outage.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().await.unavailable = unavailable;
    }

    fn check(inner: &Inner) -> StorageResult<()> {
        if inner.unavailable {
            return Err(StorageError::ConnectionFailed(
                "in-memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Max-timestamp row, ties broken by insertion order.
    fn pick_latest<'a, I>(rows: I) -> Option<&'a MetricRow>
    where
        I: Iterator<Item = &'a MetricRow>,
    {
        rows.max_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.id.cmp(&b.id))
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn append_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        for sample in samples {
            inner.next_metric_id += 1;
            let id = inner.next_metric_id;
            inner.metrics.push(MetricRow {
                id,
                asset_symbol: sample.asset_symbol,
                metric: sample.metric,
                value: sample.value,
                chain: sample.chain,
                metadata: sample.metadata,
                recorded_at: sample.recorded_at,
            });
        }
        Ok(())
    }

    async fn latest_metric(
        &self,
        asset: &str,
        metric: MetricName,
    ) -> StorageResult<Option<MetricRow>> {
        self.latest_metric_at(asset, metric, Utc::now()).await
    }

    async fn latest_metric_at(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Option<MetricRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        Ok(Self::pick_latest(inner.metrics.iter().filter(|r| {
            r.asset_symbol == asset && r.metric == metric && r.recorded_at <= cutoff
        }))
        .cloned())
    }

    async fn latest_metric_by_chain(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut chains: Vec<Option<crate::asset::Chain>> = Vec::new();
        for row in inner.metrics.iter().filter(|r| {
            r.asset_symbol == asset && r.metric == metric && r.recorded_at <= cutoff
        }) {
            if !chains.contains(&row.chain) {
                chains.push(row.chain);
            }
        }

        let mut out = Vec::new();
        for chain in chains {
            if let Some(row) = Self::pick_latest(inner.metrics.iter().filter(|r| {
                r.asset_symbol == asset
                    && r.metric == metric
                    && r.recorded_at <= cutoff
                    && r.chain == chain
            })) {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    async fn metric_range(
        &self,
        asset: &str,
        metric: MetricName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut rows: Vec<MetricRow> = inner
            .metrics
            .iter()
            .filter(|r| {
                r.asset_symbol == asset
                    && r.metric == metric
                    && r.recorded_at >= from
                    && r.recorded_at <= to
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn latest_metrics_all(&self, asset: &str) -> StorageResult<Vec<MetricRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut out = Vec::new();
        for metric in MetricName::ALL {
            if let Some(row) = Self::pick_latest(
                inner
                    .metrics
                    .iter()
                    .filter(|r| r.asset_symbol == asset && r.metric == metric),
            ) {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    async fn upsert_asset(&self, row: AssetRow) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        match inner.assets.get_mut(&row.symbol) {
            Some(existing) => {
                existing.name = row.name;
                existing.config = row.config;
                existing.enabled = row.enabled;
                existing.updated_at = row.updated_at;
            }
            None => {
                inner.assets.insert(row.symbol.clone(), row);
            }
        }
        Ok(())
    }

    async fn get_asset(&self, symbol: &str) -> StorageResult<Option<AssetRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;
        Ok(inner.assets.get(symbol).cloned())
    }

    async fn list_assets(&self, enabled_only: bool) -> StorageResult<Vec<AssetRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut rows: Vec<AssetRow> = inner
            .assets
            .values()
            .filter(|a| !enabled_only || a.enabled)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(rows)
    }

    async fn set_asset_enabled(&self, symbol: &str, enabled: bool) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        match inner.assets.get_mut(symbol) {
            Some(asset) => {
                asset.enabled = enabled;
                asset.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ensure_threshold(&self, rule: &ThresholdRule) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        let exists = inner.thresholds.iter().any(|t| {
            t.asset_symbol == rule.asset_symbol
                && t.metric == rule.metric
                && t.operator == rule.operator
                && t.value == rule.value
        });
        if !exists {
            inner.next_threshold_id += 1;
            let id = inner.next_threshold_id;
            let mut stored = rule.clone();
            stored.id = Some(id);
            inner.thresholds.push(stored);
        }
        Ok(())
    }

    async fn list_thresholds(&self) -> StorageResult<Vec<ThresholdRule>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;
        Ok(inner.thresholds.clone())
    }

    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<i64> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        inner.next_alert_id += 1;
        let id = inner.next_alert_id;
        inner.alerts.push(AlertRow {
            id,
            asset_symbol: alert.asset_symbol,
            metric: alert.metric,
            value: alert.value,
            threshold_value: alert.threshold_value,
            operator: alert.operator,
            severity: alert.severity,
            message: alert.message,
            chain: alert.chain,
            suppressed_count: 0,
            notified: false,
            notification_channel: None,
            delivery_attempts: 0,
            failure_reason: None,
            triggered_at: alert.triggered_at,
        });
        Ok(id)
    }

    async fn bump_suppressed(&self, alert_id: i64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.suppressed_count += 1;
        }
        Ok(())
    }

    async fn pending_alerts(&self, limit: usize) -> StorageResult<Vec<AlertRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut rows: Vec<AlertRow> = inner
            .alerts
            .iter()
            .filter(|a| a.is_pending())
            .cloned()
            .collect();
        // Most severe first, oldest first within a severity.
        rows.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.triggered_at.cmp(&b.triggered_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_alert_notified(&self, alert_id: i64, channel: &str) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.notified = true;
            alert.notification_channel = Some(channel.to_string());
        }
        Ok(())
    }

    async fn record_delivery_attempt(&self, alert_id: i64) -> StorageResult<u32> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        match inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.delivery_attempts += 1;
                Ok(alert.delivery_attempts)
            }
            None => Err(StorageError::QueryFailed(format!(
                "no alert with id {alert_id}"
            ))),
        }
    }

    async fn mark_alert_failed(&self, alert_id: i64, reason: &str) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner)?;

        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertRow>> {
        let inner = self.inner.read().await;
        Self::check(&inner)?;

        let mut rows: Vec<AlertRow> = inner
            .alerts
            .iter()
            .filter(|a| a.triggered_at > since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(rows)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let inner = self.inner.read().await;
        Self::check(&inner)
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
