//! Storage backend trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AlertRow, AssetRow, MetricRow, NewAlert};
use crate::catalog::{MetricName, ThresholdRule};
use crate::MetricSample;

/// Trait for persistent storage backends.
///
/// Implementations must be `Send + Sync`; every method may be called from
/// any tick task concurrently. Mutations are serialized through the
/// backend's own transactional primitives.
///
/// Metric semantics the trait guarantees to callers:
///
/// - `append_metrics` is append-only and total for valid input; it only
///   fails when the store itself is unavailable.
/// - The "latest" views are max-`recorded_at` lookups, so out-of-order
///   appends never regress them.
/// - `latest_metric_at` bounds the lookup by a cutoff timestamp, which is
///   how the scoring engine gets a consistent multi-metric snapshot.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // === metric history ===

    /// Append a batch of samples in one transaction.
    async fn append_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()>;

    /// The most recent sample for (asset, metric), or `None` when no sample
    /// exists. Absence is meaningful; there is no sentinel value.
    async fn latest_metric(
        &self,
        asset: &str,
        metric: MetricName,
    ) -> StorageResult<Option<MetricRow>>;

    /// The most recent sample with `recorded_at <= cutoff`.
    async fn latest_metric_at(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Option<MetricRow>>;

    /// Per-chain latest rows for (asset, metric) up to the cutoff. Rows
    /// with no chain tag are grouped under the null chain.
    async fn latest_metric_by_chain(
        &self,
        asset: &str,
        metric: MetricName,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>>;

    /// All samples for (asset, metric) within [from, to], oldest first.
    async fn metric_range(
        &self,
        asset: &str,
        metric: MetricName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricRow>>;

    /// Latest sample per metric for one asset.
    async fn latest_metrics_all(&self, asset: &str) -> StorageResult<Vec<MetricRow>>;

    // === asset registry ===

    /// Insert or update an asset row. `created_at` is preserved on update.
    async fn upsert_asset(&self, row: AssetRow) -> StorageResult<()>;

    async fn get_asset(&self, symbol: &str) -> StorageResult<Option<AssetRow>>;

    async fn list_assets(&self, enabled_only: bool) -> StorageResult<Vec<AssetRow>>;

    /// Returns `false` when the symbol is unknown.
    async fn set_asset_enabled(&self, symbol: &str, enabled: bool) -> StorageResult<bool>;

    // === alert thresholds ===

    /// Insert a rule unless an identical (scope, metric, operator, value)
    /// rule already exists.
    async fn ensure_threshold(&self, rule: &ThresholdRule) -> StorageResult<()>;

    async fn list_thresholds(&self) -> StorageResult<Vec<ThresholdRule>>;

    // === alert log ===

    /// Write a new pending alert, returning its id.
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<i64>;

    /// Count one suppressed firing on an existing alert.
    async fn bump_suppressed(&self, alert_id: i64) -> StorageResult<()>;

    /// Unnotified, not-yet-failed alerts, most severe first, oldest first
    /// within a severity.
    async fn pending_alerts(&self, limit: usize) -> StorageResult<Vec<AlertRow>>;

    async fn mark_alert_notified(&self, alert_id: i64, channel: &str) -> StorageResult<()>;

    /// Record one failed delivery attempt; returns the new attempt count.
    async fn record_delivery_attempt(&self, alert_id: i64) -> StorageResult<u32>;

    async fn mark_alert_failed(&self, alert_id: i64, reason: &str) -> StorageResult<()>;

    /// Alerts triggered after `since`, newest first.
    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertRow>>;

    // === lifecycle ===

    async fn health_check(&self) -> StorageResult<()>;

    async fn close(&self) -> StorageResult<()>;
}
