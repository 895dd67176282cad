//! The immutable metric snapshot the scoring engine consumes.
//!
//! Captured once per evaluation at a cutoff timestamp: for each metric the
//! max-timestamp sample at or before the cutoff. Lending metrics are
//! special-cased. Each market reports per chain, so the capture collects
//! the per-chain latest rows and aggregates them TVL-weighted before they
//! enter the value map. After capture the snapshot never changes; scoring
//! must not observe writes made later.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::asset::Chain;
use crate::catalog::MetricName;
use crate::storage::{MetricRow, StorageBackend, StorageResult};

/// One lending market's contribution to the aggregate view.
#[derive(Debug, Clone)]
pub struct LendingObservation {
    pub chain: Option<Chain>,
    pub market: Option<String>,
    pub utilization: Option<f64>,
    pub clr_pct: Option<f64>,
    pub rlr_pct: Option<f64>,
    pub tvl_usd: f64,
}

const LENDING_METRICS: [MetricName; 3] = [
    MetricName::UtilizationRate,
    MetricName::ClrPct,
    MetricName::RlrPct,
];

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub asset: String,
    pub cutoff: DateTime<Utc>,
    values: HashMap<MetricName, f64>,
    pub lending: Vec<LendingObservation>,
}

impl MetricSnapshot {
    /// Capture the latest-at-cutoff view for one asset.
    pub async fn capture(
        backend: &dyn StorageBackend,
        asset: &str,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let mut values = HashMap::new();

        for metric in MetricName::ALL {
            if LENDING_METRICS.contains(&metric) {
                continue;
            }
            if let Some(row) = backend.latest_metric_at(asset, metric, cutoff).await? {
                values.insert(metric, row.value);
            }
        }

        let mut markets: HashMap<(Option<Chain>, Option<String>), LendingObservation> =
            HashMap::new();
        for metric in LENDING_METRICS {
            for row in backend.latest_metric_by_chain(asset, metric, cutoff).await? {
                let key = (row.chain, market_anchor(&row));
                let entry = markets.entry(key.clone()).or_insert(LendingObservation {
                    chain: key.0,
                    market: key.1,
                    utilization: None,
                    clr_pct: None,
                    rlr_pct: None,
                    tvl_usd: row.market_tvl_weight(),
                });
                entry.tvl_usd = entry.tvl_usd.max(row.market_tvl_weight());
                match metric {
                    MetricName::UtilizationRate => entry.utilization = Some(row.value),
                    MetricName::ClrPct => entry.clr_pct = Some(row.value),
                    MetricName::RlrPct => entry.rlr_pct = Some(row.value),
                    _ => {}
                }
            }
        }

        let mut lending: Vec<LendingObservation> = markets.into_values().collect();
        lending.sort_by(|a, b| {
            a.chain
                .map(|c| c.as_str())
                .cmp(&b.chain.map(|c| c.as_str()))
                .then_with(|| a.market.cmp(&b.market))
        });

        let mut snapshot = Self {
            asset: asset.to_string(),
            cutoff,
            values,
            lending,
        };

        for metric in LENDING_METRICS {
            if let Some(aggregate) = snapshot.lending_weighted(metric) {
                snapshot.values.insert(metric, aggregate);
            }
        }

        Ok(snapshot)
    }

    /// Build a snapshot directly from values; the scoring engine is pure
    /// over this, which is what makes it easy to drive in tests.
    pub fn from_values(
        asset: &str,
        cutoff: DateTime<Utc>,
        values: HashMap<MetricName, f64>,
    ) -> Self {
        Self {
            asset: asset.to_string(),
            cutoff,
            values,
            lending: Vec::new(),
        }
    }

    pub fn with_value(mut self, metric: MetricName, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }

    pub fn value(&self, metric: MetricName) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    /// TVL-weighted mean of one lending metric across observed markets.
    fn lending_weighted(&self, metric: MetricName) -> Option<f64> {
        let pick = |obs: &LendingObservation| match metric {
            MetricName::UtilizationRate => obs.utilization,
            MetricName::ClrPct => obs.clr_pct,
            MetricName::RlrPct => obs.rlr_pct,
            _ => None,
        };

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for obs in &self.lending {
            if let Some(value) = pick(obs) {
                weighted_sum += value * obs.tvl_usd;
                weight_total += obs.tvl_usd;
            }
        }

        (weight_total > 0.0).then(|| weighted_sum / weight_total)
    }
}

fn market_anchor(row: &MetricRow) -> Option<String> {
    row.metadata
        .as_ref()
        .and_then(|m| m.get("market"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::MetricSample;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn capture_respects_cutoff() {
        let backend = MemoryBackend::new();
        let now = Utc::now();

        backend
            .append_metrics(vec![
                MetricSample::new(
                    "WBTC",
                    MetricName::PorRatio,
                    0.97,
                    now - Duration::minutes(30),
                ),
                MetricSample::new("WBTC", MetricName::PorRatio, 1.0, now),
            ])
            .await
            .unwrap();

        let snap = MetricSnapshot::capture(&backend, "WBTC", now - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(snap.value(MetricName::PorRatio), Some(0.97));

        let snap_now = MetricSnapshot::capture(&backend, "WBTC", now).await.unwrap();
        assert_eq!(snap_now.value(MetricName::PorRatio), Some(1.0));
    }

    #[tokio::test]
    async fn absent_metric_is_none_not_zero() {
        let backend = MemoryBackend::new();
        let snap = MetricSnapshot::capture(&backend, "WBTC", Utc::now())
            .await
            .unwrap();
        assert_eq!(snap.value(MetricName::Hhi), None);
    }

    #[tokio::test]
    async fn lending_metrics_aggregate_tvl_weighted() {
        let backend = MemoryBackend::new();
        let now = Utc::now();

        let market = |chain: Chain, name: &str, util: f64, tvl: f64| {
            MetricSample::new("WBTC", MetricName::UtilizationRate, util, now)
                .on_chain(chain)
                .with_metadata(json!({ "market": name, "market_tvl_usd": tvl }))
        };

        backend
            .append_metrics(vec![
                market(Chain::Ethereum, "aave-v3-eth", 40.0, 9_000_000.0),
                market(Chain::Base, "aave-v3-base", 90.0, 1_000_000.0),
            ])
            .await
            .unwrap();

        let snap = MetricSnapshot::capture(&backend, "WBTC", now).await.unwrap();
        // (40 * 9M + 90 * 1M) / 10M = 45.
        assert_eq!(snap.value(MetricName::UtilizationRate), Some(45.0));
        assert_eq!(snap.lending.len(), 2);
    }

    #[tokio::test]
    async fn per_market_rows_keep_their_identity() {
        let backend = MemoryBackend::new();
        let now = Utc::now();

        backend
            .append_metrics(vec![
                MetricSample::new("WBTC", MetricName::ClrPct, 3.0, now)
                    .on_chain(Chain::Ethereum)
                    .with_metadata(json!({ "market": "aave-v3-eth", "market_tvl_usd": 5e6 })),
                MetricSample::new("WBTC", MetricName::RlrPct, 4.0, now)
                    .on_chain(Chain::Ethereum)
                    .with_metadata(json!({ "market": "aave-v3-eth", "market_tvl_usd": 5e6 })),
            ])
            .await
            .unwrap();

        let snap = MetricSnapshot::capture(&backend, "WBTC", now).await.unwrap();
        assert_eq!(snap.lending.len(), 1);
        let obs = &snap.lending[0];
        assert_eq!(obs.market.as_deref(), Some("aave-v3-eth"));
        assert_eq!(obs.clr_pct, Some(3.0));
        assert_eq!(obs.rlr_pct, Some(4.0));
        assert_eq!(obs.utilization, None);
    }
}
