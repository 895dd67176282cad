//! Lending fetcher: utilization, cascade liquidation risk and recursive
//! lending per market.
//!
//! Every sample is tagged with the market's chain and anchor, and carries
//! `market_tvl_usd` in its metadata so the scoring engine can aggregate
//! multiple markets TVL-weighted.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{FetchError, FetchResult, FetchScope, FetcherKind};
use crate::asset::{AssetConfig, LendingConfig};
use crate::catalog::MetricName;
use crate::source::{DataSource, LendingMarketState};
use crate::MetricSample;

/// Positions below this health factor count toward cascade risk.
const AT_RISK_HEALTH_FACTOR: f64 = 1.1;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    scope: FetchScope,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let FetchScope::LendingMarket(index) = scope else {
        return Ok(vec![]);
    };
    let Some(market) = config.lending_configs.get(index) else {
        return Ok(vec![]);
    };

    let state = source
        .lending_market(market)
        .await
        .map_err(|e| FetchError::from_source(FetcherKind::Lending, e))?;

    Ok(build_samples(symbol, market, &state, now))
}

fn build_samples(
    symbol: &str,
    market: &LendingConfig,
    state: &LendingMarketState,
    now: DateTime<Utc>,
) -> Vec<MetricSample> {
    if state.supplied_usd <= 0.0 {
        return vec![];
    }

    let metadata = json!({
        "protocol": market.protocol.to_string(),
        "market": market.anchor(),
        "market_tvl_usd": state.supplied_usd,
    });

    let sample = |metric: MetricName, value: f64| {
        MetricSample::new(symbol, metric, value, now)
            .on_chain(market.chain)
            .with_metadata(metadata.clone())
    };

    let utilization = state.borrowed_usd / state.supplied_usd * 100.0;

    let total_debt: f64 = state.positions.iter().map(|p| p.debt_usd).sum();
    let at_risk_debt: f64 = state
        .positions
        .iter()
        .filter(|p| p.health_factor < AT_RISK_HEALTH_FACTOR)
        .map(|p| p.debt_usd)
        .sum();
    let clr = if total_debt > 0.0 {
        at_risk_debt / total_debt * 100.0
    } else {
        0.0
    };

    let rlr = state.looped_supply_usd / state.supplied_usd * 100.0;

    vec![
        sample(MetricName::UtilizationRate, utilization),
        sample(MetricName::ClrPct, clr),
        sample(MetricName::RlrPct, rlr),
    ]
}
