//! Metric kinds and the threshold catalog.
//!
//! The metric catalog is a closed set: every sample written to the store
//! carries one of the names defined here, each with a unit, a direction and
//! a collection frequency class. The threshold catalog holds the built-in
//! alert rules plus any persisted custom rules; it is loaded once at process
//! start and swapped atomically on reload.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{StorageBackend, StorageResult};

/// Collection frequency classes, from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyClass {
    /// Backing and peg integrity, sampled every few minutes.
    Critical,
    /// Liquidity depth and lending utilization.
    High,
    /// Concentration and structural lending risk.
    Medium,
    /// Historical price statistics.
    Daily,
}

impl FrequencyClass {
    pub const ALL: [FrequencyClass; 4] = [
        FrequencyClass::Critical,
        FrequencyClass::High,
        FrequencyClass::Medium,
        FrequencyClass::Daily,
    ];

    /// Metrics collected at this frequency.
    pub fn metrics(&self) -> &'static [MetricName] {
        use MetricName::*;
        match self {
            FrequencyClass::Critical => &[PorRatio, OracleFreshnessMinutes, PegDeviationPct],
            FrequencyClass::High => &[PoolTvlUsd, UtilizationRate, Slippage100kPct, Slippage500kPct],
            FrequencyClass::Medium => &[
                Hhi,
                Gini,
                ClrPct,
                RlrPct,
                TotalSupply,
                Top10LpConcentrationPct,
                CrossChainOracleLagMinutes,
            ],
            FrequencyClass::Daily => &[
                VolatilityAnnualizedPct,
                Var95Pct,
                Cvar95Pct,
                PriceDeviation365dMaxPct,
            ],
        }
    }
}

impl fmt::Display for FrequencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrequencyClass::Critical => "critical",
            FrequencyClass::High => "high",
            FrequencyClass::Medium => "medium",
            FrequencyClass::Daily => "daily",
        };
        write!(f, "{name}")
    }
}

/// Whether a larger value of the metric is good or bad news.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// The closed set of metric names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    #[serde(rename = "por_ratio")]
    PorRatio,
    #[serde(rename = "oracle_freshness_minutes")]
    OracleFreshnessMinutes,
    #[serde(rename = "peg_deviation_pct")]
    PegDeviationPct,
    #[serde(rename = "pool_tvl_usd")]
    PoolTvlUsd,
    #[serde(rename = "utilization_rate")]
    UtilizationRate,
    #[serde(rename = "slippage_100k_pct")]
    Slippage100kPct,
    #[serde(rename = "slippage_500k_pct")]
    Slippage500kPct,
    #[serde(rename = "hhi")]
    Hhi,
    #[serde(rename = "gini")]
    Gini,
    #[serde(rename = "clr_pct")]
    ClrPct,
    #[serde(rename = "rlr_pct")]
    RlrPct,
    #[serde(rename = "total_supply")]
    TotalSupply,
    #[serde(rename = "top10_lp_concentration_pct")]
    Top10LpConcentrationPct,
    #[serde(rename = "cross_chain_oracle_lag_minutes")]
    CrossChainOracleLagMinutes,
    #[serde(rename = "volatility_annualized_pct")]
    VolatilityAnnualizedPct,
    #[serde(rename = "var95_pct")]
    Var95Pct,
    #[serde(rename = "cvar95_pct")]
    Cvar95Pct,
    #[serde(rename = "price_deviation_365d_max_pct")]
    PriceDeviation365dMaxPct,
}

impl MetricName {
    pub const ALL: [MetricName; 18] = [
        MetricName::PorRatio,
        MetricName::OracleFreshnessMinutes,
        MetricName::PegDeviationPct,
        MetricName::PoolTvlUsd,
        MetricName::UtilizationRate,
        MetricName::Slippage100kPct,
        MetricName::Slippage500kPct,
        MetricName::Hhi,
        MetricName::Gini,
        MetricName::ClrPct,
        MetricName::RlrPct,
        MetricName::TotalSupply,
        MetricName::Top10LpConcentrationPct,
        MetricName::CrossChainOracleLagMinutes,
        MetricName::VolatilityAnnualizedPct,
        MetricName::Var95Pct,
        MetricName::Cvar95Pct,
        MetricName::PriceDeviation365dMaxPct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PorRatio => "por_ratio",
            MetricName::OracleFreshnessMinutes => "oracle_freshness_minutes",
            MetricName::PegDeviationPct => "peg_deviation_pct",
            MetricName::PoolTvlUsd => "pool_tvl_usd",
            MetricName::UtilizationRate => "utilization_rate",
            MetricName::Slippage100kPct => "slippage_100k_pct",
            MetricName::Slippage500kPct => "slippage_500k_pct",
            MetricName::Hhi => "hhi",
            MetricName::Gini => "gini",
            MetricName::ClrPct => "clr_pct",
            MetricName::RlrPct => "rlr_pct",
            MetricName::TotalSupply => "total_supply",
            MetricName::Top10LpConcentrationPct => "top10_lp_concentration_pct",
            MetricName::CrossChainOracleLagMinutes => "cross_chain_oracle_lag_minutes",
            MetricName::VolatilityAnnualizedPct => "volatility_annualized_pct",
            MetricName::Var95Pct => "var95_pct",
            MetricName::Cvar95Pct => "cvar95_pct",
            MetricName::PriceDeviation365dMaxPct => "price_deviation_365d_max_pct",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricName::PorRatio => "ratio",
            MetricName::OracleFreshnessMinutes | MetricName::CrossChainOracleLagMinutes => {
                "minutes"
            }
            MetricName::PoolTvlUsd => "usd",
            MetricName::TotalSupply => "tokens",
            MetricName::Hhi => "index",
            MetricName::Gini => "coefficient",
            _ => "percent",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            MetricName::PorRatio | MetricName::PoolTvlUsd | MetricName::TotalSupply => {
                Direction::HigherIsBetter
            }
            _ => Direction::LowerIsBetter,
        }
    }

    pub fn class(&self) -> FrequencyClass {
        for class in FrequencyClass::ALL {
            if class.metrics().contains(self) {
                return class;
            }
        }
        unreachable!("every metric belongs to a frequency class")
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric name: {s}"))
    }
}

/// Threshold comparison operator, evaluated as `value operator threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "=",
        }
    }

    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Lt => value < threshold,
            Operator::Le => value <= threshold,
            Operator::Gt => value > threshold,
            Operator::Ge => value >= threshold,
            Operator::Eq => value == threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "=" => Ok(Operator::Eq),
            other => Err(format!("unknown operator: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One alert rule. `asset_symbol = None` makes the rule global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub id: Option<i64>,
    pub asset_symbol: Option<String>,
    pub metric: MetricName,
    pub operator: Operator,
    pub value: f64,
    pub severity: Severity,
    pub enabled: bool,
}

impl ThresholdRule {
    pub fn global(metric: MetricName, operator: Operator, value: f64, severity: Severity) -> Self {
        Self {
            id: None,
            asset_symbol: None,
            metric,
            operator,
            value,
            severity,
            enabled: true,
        }
    }
}

/// Built-in rules, installed on first start.
pub fn seed_rules() -> Vec<ThresholdRule> {
    use MetricName::*;
    use Operator::*;
    use Severity::*;

    vec![
        ThresholdRule::global(PorRatio, Lt, 1.0, Critical),
        ThresholdRule::global(PorRatio, Lt, 0.99, Critical),
        ThresholdRule::global(OracleFreshnessMinutes, Gt, 30.0, Warning),
        ThresholdRule::global(OracleFreshnessMinutes, Gt, 60.0, Critical),
        ThresholdRule::global(PegDeviationPct, Gt, 2.0, Warning),
        ThresholdRule::global(PegDeviationPct, Gt, 5.0, Critical),
        ThresholdRule::global(UtilizationRate, Gt, 90.0, Warning),
        ThresholdRule::global(UtilizationRate, Gt, 95.0, Critical),
        ThresholdRule::global(PoolTvlUsd, Lt, 100_000.0, Warning),
        ThresholdRule::global(Slippage100kPct, Gt, 2.0, Warning),
        ThresholdRule::global(Slippage100kPct, Gt, 5.0, Critical),
        ThresholdRule::global(Hhi, Gt, 4000.0, Warning),
        ThresholdRule::global(Hhi, Gt, 6000.0, Critical),
        ThresholdRule::global(Gini, Gt, 0.8, Warning),
        ThresholdRule::global(Gini, Gt, 0.9, Critical),
        ThresholdRule::global(ClrPct, Gt, 10.0, Warning),
        ThresholdRule::global(ClrPct, Gt, 20.0, Critical),
        ThresholdRule::global(RlrPct, Gt, 20.0, Warning),
        ThresholdRule::global(RlrPct, Gt, 35.0, Critical),
    ]
}

/// Read-mostly rule set. Lookups clone out matching rules; `reload` swaps
/// the whole set atomically so a tick in flight keeps the set it started
/// with.
pub struct ThresholdCatalog {
    rules: RwLock<Arc<Vec<ThresholdRule>>>,
}

impl ThresholdCatalog {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// Ensure the seed rules exist in storage, then load the full persisted
    /// rule set into a catalog.
    pub async fn load(backend: &dyn StorageBackend) -> StorageResult<Self> {
        for rule in seed_rules() {
            backend.ensure_threshold(&rule).await?;
        }
        let rules = backend.list_thresholds().await?;
        info!("threshold catalog loaded with {} rules", rules.len());
        Ok(Self::new(rules))
    }

    pub fn reload(&self, rules: Vec<ThresholdRule>) {
        let mut guard = self.rules.write().expect("threshold catalog lock poisoned");
        *guard = Arc::new(rules);
    }

    pub fn snapshot(&self) -> Arc<Vec<ThresholdRule>> {
        self.rules
            .read()
            .expect("threshold catalog lock poisoned")
            .clone()
    }

    /// Rules applicable to one (asset, metric) pair. An asset-scoped rule
    /// set for a metric shadows the global rules for that metric.
    pub fn rules_for(&self, asset: &str, metric: MetricName) -> Vec<ThresholdRule> {
        let rules = self.snapshot();

        let overrides: Vec<ThresholdRule> = rules
            .iter()
            .filter(|r| {
                r.enabled && r.metric == metric && r.asset_symbol.as_deref() == Some(asset)
            })
            .cloned()
            .collect();

        if !overrides.is_empty() {
            return overrides;
        }

        rules
            .iter()
            .filter(|r| r.enabled && r.metric == metric && r.asset_symbol.is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_round_trip() {
        for metric in MetricName::ALL {
            let parsed: MetricName = metric.as_str().parse().unwrap();
            assert_eq!(parsed, metric);

            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.as_str()));
        }
    }

    #[test]
    fn every_metric_has_exactly_one_class() {
        for metric in MetricName::ALL {
            let count = FrequencyClass::ALL
                .iter()
                .filter(|c| c.metrics().contains(&metric))
                .count();
            assert_eq!(count, 1, "{metric} appears in {count} classes");
        }
    }

    #[test]
    fn operator_evaluation() {
        assert!(Operator::Lt.evaluate(0.98, 1.0));
        assert!(!Operator::Lt.evaluate(1.0, 1.0));
        assert!(Operator::Le.evaluate(1.0, 1.0));
        assert!(Operator::Gt.evaluate(95.0, 90.0));
        assert!(Operator::Ge.evaluate(90.0, 90.0));
        assert!(Operator::Eq.evaluate(5.0, 5.0));
    }

    #[test]
    fn seed_rules_match_seed_table() {
        let rules = seed_rules();
        assert_eq!(rules.len(), 19);
        assert!(rules.iter().all(|r| r.asset_symbol.is_none() && r.enabled));

        let por_critical = rules
            .iter()
            .filter(|r| r.metric == MetricName::PorRatio && r.severity == Severity::Critical)
            .count();
        assert_eq!(por_critical, 2);
    }

    #[test]
    fn asset_override_shadows_global() {
        let mut rules = seed_rules();
        rules.push(ThresholdRule {
            id: None,
            asset_symbol: Some("WBTC".to_string()),
            metric: MetricName::PegDeviationPct,
            operator: Operator::Gt,
            value: 1.0,
            severity: Severity::Warning,
            enabled: true,
        });
        let catalog = ThresholdCatalog::new(rules);

        let for_wbtc = catalog.rules_for("WBTC", MetricName::PegDeviationPct);
        assert_eq!(for_wbtc.len(), 1);
        assert_eq!(for_wbtc[0].value, 1.0);

        let for_other = catalog.rules_for("USDC", MetricName::PegDeviationPct);
        assert_eq!(for_other.len(), 2);
    }

    #[test]
    fn reload_swaps_rule_set() {
        let catalog = ThresholdCatalog::new(seed_rules());
        assert!(!catalog.rules_for("X", MetricName::PorRatio).is_empty());

        catalog.reload(vec![]);
        assert!(catalog.rules_for("X", MetricName::PorRatio).is_empty());
    }
}
