//! Alert engine: threshold evaluation on every appended sample.
//!
//! A breach writes an alert row and arms a suppression window for its
//! (asset, metric, operator, threshold, severity) tuple. Repeat breaches of
//! the same tuple inside the window are not written; they are counted on
//! the last unnotified alert so the notifier can report how many firings a
//! storm produced. Warning and critical rules firing together both write;
//! severities are never collapsed into one another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::catalog::{Operator, Severity, ThresholdCatalog, ThresholdRule};
use crate::storage::{NewAlert, StorageBackend, StorageError};
use crate::MetricSample;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SuppressionKey {
    asset: String,
    metric: crate::MetricName,
    operator: Operator,
    /// Bit pattern of the threshold value; thresholds compare exactly.
    threshold_bits: u64,
    severity: Severity,
}

impl SuppressionKey {
    fn for_rule(sample: &MetricSample, rule: &ThresholdRule) -> Self {
        Self {
            asset: sample.asset_symbol.clone(),
            metric: sample.metric,
            operator: rule.operator,
            threshold_bits: rule.value.to_bits(),
            severity: rule.severity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SuppressionEntry {
    last_fired: DateTime<Utc>,
    alert_id: i64,
}

pub struct AlertEngine {
    backend: Arc<dyn StorageBackend>,
    catalog: Arc<ThresholdCatalog>,
    window: chrono::Duration,
    state: Mutex<HashMap<SuppressionKey, SuppressionEntry>>,
}

impl AlertEngine {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<ThresholdCatalog>,
        suppression_window: Duration,
    ) -> Self {
        Self {
            backend,
            catalog,
            window: chrono::Duration::from_std(suppression_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate one sample against all applicable rules. Returns the number
    /// of alert rows written. Suppression time is measured against the
    /// sample's own timestamp, which keeps replays deterministic.
    #[instrument(skip(self, sample), fields(asset = %sample.asset_symbol, metric = %sample.metric))]
    pub async fn evaluate(&self, sample: &MetricSample) -> Result<usize, StorageError> {
        let rules = self.catalog.rules_for(&sample.asset_symbol, sample.metric);
        if rules.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for rule in rules {
            if !rule.operator.evaluate(sample.value, rule.value) {
                continue;
            }

            let key = SuppressionKey::for_rule(sample, &rule);
            let mut state = self.state.lock().await;

            if let Some(entry) = state.get(&key) {
                let elapsed = sample.recorded_at.signed_duration_since(entry.last_fired);
                if elapsed < self.window {
                    trace!(
                        "suppressing repeat breach of {} {} {} within window",
                        sample.metric,
                        rule.operator,
                        rule.value
                    );
                    self.backend.bump_suppressed(entry.alert_id).await?;
                    continue;
                }
            }

            let alert_id = self
                .backend
                .insert_alert(NewAlert {
                    asset_symbol: sample.asset_symbol.clone(),
                    metric: sample.metric,
                    value: sample.value,
                    threshold_value: rule.value,
                    operator: rule.operator,
                    severity: rule.severity,
                    message: render_message(sample, &rule),
                    chain: sample.chain,
                    triggered_at: sample.recorded_at,
                })
                .await?;

            state.insert(
                key,
                SuppressionEntry {
                    last_fired: sample.recorded_at,
                    alert_id,
                },
            );
            written += 1;

            debug!(
                "alert {} written: {} {} {} (value {})",
                alert_id, sample.metric, rule.operator, rule.value, sample.value
            );
        }

        Ok(written)
    }
}

fn render_message(sample: &MetricSample, rule: &ThresholdRule) -> String {
    let mut message = format!("{} {}", sample.asset_symbol, sample.metric);
    if let Some(chain) = sample.chain {
        message.push_str(&format!(" ({chain})"));
    }
    message.push_str(&format!(
        ": {:.4} {} {} [{}]",
        sample.value, rule.operator, rule.value, rule.severity
    ));
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{seed_rules, MetricName};
    use crate::storage::memory::MemoryBackend;
    use chrono::Duration as ChronoDuration;

    fn engine(backend: Arc<MemoryBackend>) -> AlertEngine {
        AlertEngine::new(
            backend,
            Arc::new(ThresholdCatalog::new(seed_rules())),
            std::time::Duration::from_secs(15 * 60),
        )
    }

    fn por_sample(value: f64, at: DateTime<Utc>) -> MetricSample {
        MetricSample::new("WBTC", MetricName::PorRatio, value, at)
    }

    #[tokio::test]
    async fn breach_writes_alert_with_message() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());
        let now = Utc::now();

        let written = engine.evaluate(&por_sample(0.995, now)).await.unwrap();
        // 0.995 breaches `< 1.0` but not `< 0.99`.
        assert_eq!(written, 1);

        let pending = backend.pending_alerts(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message, "WBTC por_ratio: 0.9950 < 1 [critical]");
        assert_eq!(pending[0].triggered_at, now);
    }

    #[tokio::test]
    async fn passing_value_writes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());

        let written = engine.evaluate(&por_sample(1.01, Utc::now())).await.unwrap();
        assert_eq!(written, 0);
        assert!(backend.pending_alerts(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn suppression_window_counts_repeats() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());
        let t0 = Utc::now();

        // t=0 fires, t=1min and t=5min suppressed, t=20min fires again.
        assert_eq!(engine.evaluate(&por_sample(0.98, t0)).await.unwrap(), 2);
        assert_eq!(
            engine
                .evaluate(&por_sample(0.97, t0 + ChronoDuration::minutes(1)))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            engine
                .evaluate(&por_sample(0.96, t0 + ChronoDuration::minutes(5)))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            engine
                .evaluate(&por_sample(0.95, t0 + ChronoDuration::minutes(20)))
                .await
                .unwrap(),
            2
        );

        let alerts = backend.active_alerts(t0 - ChronoDuration::hours(1)).await.unwrap();
        let lt_one: Vec<_> = alerts
            .iter()
            .filter(|a| a.threshold_value == 1.0)
            .collect();
        assert_eq!(lt_one.len(), 2);

        // The two skipped firings accumulated on the first alert.
        let first = lt_one.iter().find(|a| a.triggered_at == t0).unwrap();
        assert_eq!(first.suppressed_count, 2);
    }

    #[tokio::test]
    async fn warning_and_critical_both_fire_for_same_metric() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());

        // 96% utilization breaches the warning (>90) and critical (>95) rules.
        let sample = MetricSample::new("WBTC", MetricName::UtilizationRate, 96.0, Utc::now());
        let written = engine.evaluate(&sample).await.unwrap();
        assert_eq!(written, 2);

        let pending = backend.pending_alerts(10).await.unwrap();
        let severities: Vec<Severity> = pending.iter().map(|a| a.severity).collect();
        assert!(severities.contains(&Severity::Critical));
        assert!(severities.contains(&Severity::Warning));
    }

    #[tokio::test]
    async fn distinct_tuples_do_not_suppress_each_other() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine(backend.clone());
        let now = Utc::now();

        // Two different thresholds on the same metric are distinct tuples.
        assert_eq!(engine.evaluate(&por_sample(0.995, now)).await.unwrap(), 1);
        assert_eq!(
            engine
                .evaluate(&por_sample(0.98, now + ChronoDuration::minutes(1)))
                .await
                .unwrap(),
            1,
            "the < 0.99 rule fires fresh even though < 1.0 is suppressed"
        );
    }
}
