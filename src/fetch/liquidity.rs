//! Liquidity fetcher: pool depth, slippage and LP concentration.
//!
//! Slippage is the constant-product price impact of a trade executed into
//! the pool's asset-side reserve: `impact = trade / (reserve + trade)`.
//! Pools with no readable reserve simply omit the slippage samples.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{herfindahl, top_share_pct, FetchError, FetchResult, FetchScope, FetcherKind};
use crate::asset::{AssetConfig, DexPool};
use crate::catalog::MetricName;
use crate::source::{DataSource, PoolState};
use crate::MetricSample;

const TRADE_100K: f64 = 100_000.0;
const TRADE_500K: f64 = 500_000.0;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    scope: FetchScope,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let FetchScope::DexPool(index) = scope else {
        return Ok(vec![]);
    };
    let Some(pool) = config.dex_pools.get(index) else {
        return Ok(vec![]);
    };

    let state = source
        .pool_state(pool)
        .await
        .map_err(|e| FetchError::from_source(FetcherKind::Liquidity, e))?;

    Ok(build_samples(symbol, pool, &state, now))
}

fn build_samples(
    symbol: &str,
    pool: &DexPool,
    state: &PoolState,
    now: DateTime<Utc>,
) -> Vec<MetricSample> {
    let metadata = json!({
        "pool": pool.pool_address,
        "protocol": pool.protocol.to_string(),
        "pool_name": pool.pool_name,
    });

    let sample = |metric: MetricName, value: f64| {
        MetricSample::new(symbol, metric, value, now)
            .on_chain(pool.chain)
            .with_metadata(metadata.clone())
    };

    let mut samples = vec![sample(MetricName::PoolTvlUsd, state.tvl_usd)];

    if state.token_reserve_usd > 0.0 {
        samples.push(sample(
            MetricName::Slippage100kPct,
            price_impact_pct(TRADE_100K, state.token_reserve_usd),
        ));
        samples.push(sample(
            MetricName::Slippage500kPct,
            price_impact_pct(TRADE_500K, state.token_reserve_usd),
        ));
    }

    if !state.lp_balances.is_empty() {
        samples.push(sample(MetricName::Hhi, herfindahl(&state.lp_balances)));
        samples.push(sample(
            MetricName::Top10LpConcentrationPct,
            top_share_pct(&state.lp_balances, 10),
        ));
    }

    samples
}

fn price_impact_pct(trade_usd: f64, reserve_usd: f64) -> f64 {
    trade_usd / (reserve_usd + trade_usd) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Chain, DexProtocol};
    use crate::source::fixture::FixtureSource;

    fn pool_config() -> AssetConfig {
        AssetConfig {
            dex_pools: vec![DexPool {
                protocol: DexProtocol::UniswapV3,
                chain: Chain::Ethereum,
                pool_address: "0xpool".to_string(),
                pool_name: Some("WBTC/USDC 0.3%".to_string()),
                extra: serde_json::Map::new(),
            }],
            ..AssetConfig::default()
        }
    }

    #[tokio::test]
    async fn deep_pool_produces_low_slippage() {
        let source = FixtureSource::new();
        source.set_pool(
            Chain::Ethereum,
            "0xpool",
            PoolState {
                tvl_usd: 120_000_000.0,
                token_reserve_usd: 60_000_000.0,
                lp_balances: vec![1000.0; 40],
            },
        );

        let samples = fetch(
            "WBTC",
            &pool_config(),
            FetchScope::DexPool(0),
            &source,
            Utc::now(),
        )
        .await
        .unwrap();

        let slippage = samples
            .iter()
            .find(|s| s.metric == MetricName::Slippage100kPct)
            .unwrap();
        // 100k into 60M reserve: 100k / 60.1M ~ 0.166%.
        assert!(slippage.value < 0.2);

        let tvl = samples
            .iter()
            .find(|s| s.metric == MetricName::PoolTvlUsd)
            .unwrap();
        assert_eq!(tvl.value, 120_000_000.0);
        assert_eq!(tvl.chain, Some(Chain::Ethereum));
    }

    #[tokio::test]
    async fn slippage_grows_with_trade_size() {
        let state = PoolState {
            tvl_usd: 10_000_000.0,
            token_reserve_usd: 5_000_000.0,
            lp_balances: vec![],
        };
        let pool = pool_config().dex_pools[0].clone();
        let samples = build_samples("WBTC", &pool, &state, Utc::now());

        let s100 = samples
            .iter()
            .find(|s| s.metric == MetricName::Slippage100kPct)
            .unwrap()
            .value;
        let s500 = samples
            .iter()
            .find(|s| s.metric == MetricName::Slippage500kPct)
            .unwrap()
            .value;
        assert!(s500 > s100);
    }

    #[tokio::test]
    async fn empty_reserve_omits_slippage_but_keeps_tvl() {
        let state = PoolState {
            tvl_usd: 0.0,
            token_reserve_usd: 0.0,
            lp_balances: vec![],
        };
        let pool = pool_config().dex_pools[0].clone();
        let samples = build_samples("WBTC", &pool, &state, Utc::now());

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric, MetricName::PoolTvlUsd);
    }

    #[tokio::test]
    async fn out_of_range_pool_index_is_empty_success() {
        let source = FixtureSource::new();
        let samples = fetch(
            "WBTC",
            &pool_config(),
            FetchScope::DexPool(7),
            &source,
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(samples.is_empty());
    }
}
