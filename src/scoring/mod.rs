//! Two-stage scoring engine.
//!
//! Stage 1 runs the binary primary checks; a failing gate disqualifies the
//! asset and no numeric score exists. Stage 2 computes the six weighted
//! category scores from the metric snapshot plus static configuration, then
//! applies the circuit breakers to produce the final score and grade.
//!
//! Scoring is pure compute over the captured snapshot: evaluating the same
//! configuration against the same snapshot always yields the identical
//! report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

pub mod anchors;
pub mod breakers;
pub mod categories;
pub mod checks;
pub mod snapshot;

pub use breakers::{Grade, GradeOutcome};
pub use categories::CategoryScore;
pub use checks::{CheckResult, PrimaryChecks};
pub use snapshot::MetricSnapshot;

use crate::asset::AssetConfig;
use crate::registry::RegisteredAsset;
use crate::storage::{StorageBackend, StorageResult};

/// Complete risk assessment for one asset at one point in time.
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub asset: String,
    pub evaluated_at: DateTime<Utc>,
    pub qualified: bool,
    pub checks: Vec<CheckResult>,
    /// Categories that had at least one input; empty when disqualified.
    pub categories: Vec<CategoryScore>,
    /// Present only for qualified assets.
    pub outcome: Option<GradeOutcome>,
}

/// Evaluate one asset against a snapshot. Pure; no I/O.
pub fn evaluate(symbol: &str, config: &AssetConfig, snapshot: &MetricSnapshot) -> ScoreReport {
    let primary = checks::run_primary_checks(config, snapshot.cutoff);

    if !primary.qualified {
        return ScoreReport {
            asset: symbol.to_string(),
            evaluated_at: snapshot.cutoff,
            qualified: false,
            checks: primary.checks,
            categories: Vec::new(),
            outcome: None,
        };
    }

    let categories = categories::score_categories(config, snapshot);

    // Weighted sum over the categories that reported, with the weight of
    // absent categories redistributed proportionally.
    let weight_total: f64 = categories.iter().map(|c| c.weight).sum();
    let raw_score = if weight_total > 0.0 {
        categories
            .iter()
            .map(|c| c.score * (c.weight / weight_total))
            .sum()
    } else {
        0.0
    };

    let outcome = breakers::apply_breakers(raw_score, &categories, config, snapshot, &primary);

    ScoreReport {
        asset: symbol.to_string(),
        evaluated_at: snapshot.cutoff,
        qualified: true,
        checks: primary.checks,
        categories,
        outcome: Some(outcome),
    }
}

/// Snapshot-capturing front end over [`evaluate`].
pub struct ScoreEngine {
    backend: Arc<dyn StorageBackend>,
}

impl ScoreEngine {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Score an asset from the latest metrics at or before `cutoff`.
    #[instrument(skip(self, asset), fields(symbol = %asset.symbol))]
    pub async fn score_asset(
        &self,
        asset: &RegisteredAsset,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<ScoreReport> {
        let snapshot =
            MetricSnapshot::capture(self.backend.as_ref(), &asset.symbol, cutoff).await?;
        Ok(evaluate(&asset.symbol, &asset.config, &snapshot))
    }
}
