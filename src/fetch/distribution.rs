//! Distribution fetcher: token-holder concentration and supply, per chain.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{gini, herfindahl, top_share_pct, FetchError, FetchResult, FetcherKind};
use crate::asset::AssetConfig;
use crate::catalog::MetricName;
use crate::source::DataSource;
use crate::MetricSample;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    if config.token_addresses.is_empty() {
        return Ok(vec![]);
    }

    let mut samples = Vec::new();

    for token in &config.token_addresses {
        let holders = source
            .holder_set(token.chain, &token.address)
            .await
            .map_err(|e| FetchError::from_source(FetcherKind::Distribution, e))?;

        let metadata = json!({ "token_address": token.address });
        let sample = |metric: MetricName, value: f64| {
            MetricSample::new(symbol, metric, value, now)
                .on_chain(token.chain)
                .with_metadata(metadata.clone())
        };

        samples.push(sample(MetricName::TotalSupply, holders.total_supply));

        if !holders.balances.is_empty() {
            samples.push(sample(MetricName::Gini, gini(&holders.balances)));
            samples.push(sample(MetricName::Hhi, herfindahl(&holders.balances)));
            samples.push(sample(
                MetricName::Top10LpConcentrationPct,
                top_share_pct(&holders.balances, 10),
            ));
        }
    }

    Ok(samples)
}
