use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod alerts;
pub mod asset;
pub mod catalog;
pub mod dispatcher;
pub mod fetch;
pub mod notifier;
pub mod registry;
pub mod scheduler;
pub mod scoring;
pub mod settings;
pub mod source;
pub mod storage;

pub use asset::Chain;
pub use catalog::MetricName;

/// One observation of one metric for one asset.
///
/// Samples are produced by fetchers and appended verbatim to the metric
/// store; they are never mutated afterwards. `chain` is set when the
/// observation is scoped to a single chain (per-feed freshness, per-market
/// lending data); `metadata` carries free-form structured context such as
/// the pool or market anchor the sample came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub asset_symbol: String,
    pub metric: MetricName,
    pub value: f64,
    pub chain: Option<Chain>,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(asset: &str, metric: MetricName, value: f64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            asset_symbol: asset.to_string(),
            metric,
            value,
            chain: None,
            metadata: None,
            recorded_at,
        }
    }

    pub fn on_chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
