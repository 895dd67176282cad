//! Reserve fetcher: the proof-of-reserve ratio.
//!
//! Computation depends on the configured attestation kind. A ratio of 1.0
//! means fully backed. A non-positive supply is a schema problem on the
//! attestation side and is terminal, not retriable.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{FetchError, FetchResult, FetcherKind};
use crate::asset::{AssetConfig, ProofOfReserve};
use crate::catalog::MetricName;
use crate::source::DataSource;
use crate::MetricSample;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let Some(por) = &config.proof_of_reserve else {
        return Ok(vec![]);
    };

    let (ratio, detail) = match por {
        ProofOfReserve::ChainlinkPor { feeds } => {
            let mut reserves = 0.0;
            let mut supply = 0.0;
            for feed in feeds {
                let round = source
                    .feed_round(feed.chain, &feed.aggregator)
                    .await
                    .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
                let chain_supply = source
                    .token_supply(feed.chain, &feed.token_address)
                    .await
                    .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
                reserves += round.answer;
                supply += chain_supply;
            }
            (
                ratio_of(reserves, supply)?,
                json!({ "kind": "chainlink_por", "reserves": reserves, "supply": supply }),
            )
        }

        ProofOfReserve::LiquidStaking { staked_token } => {
            let state = source
                .staking_state(staked_token.chain, &staked_token.address)
                .await
                .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
            (
                ratio_of(state.backing_units, state.issued_units)?,
                json!({
                    "kind": "liquid_staking",
                    "backing_units": state.backing_units,
                    "issued_units": state.issued_units,
                }),
            )
        }

        ProofOfReserve::Fractional { backing_source } => {
            let report = source
                .backing_report(backing_source)
                .await
                .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
            (
                ratio_of(report.reserves, report.supply)?,
                json!({ "kind": "fractional", "reserves": report.reserves, "supply": report.supply }),
            )
        }

        ProofOfReserve::NavBased { oracle } => {
            let round = source
                .feed_round(oracle.chain, &oracle.address)
                .await
                .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
            if round.answer <= 0.0 {
                return Err(FetchError::terminal(
                    FetcherKind::Reserve,
                    format!("nav oracle returned non-positive answer {}", round.answer),
                ));
            }
            (round.answer, json!({ "kind": "nav_based", "oracle": oracle.address }))
        }

        ProofOfReserve::Scraper { url, parser_hint } => {
            let report = source
                .scrape_reserves(url, parser_hint)
                .await
                .map_err(|e| FetchError::from_source(FetcherKind::Reserve, e))?;
            (
                ratio_of(report.reserves, report.supply)?,
                json!({ "kind": "scraper", "reserves": report.reserves, "supply": report.supply }),
            )
        }
    };

    Ok(vec![MetricSample::new(
        symbol,
        MetricName::PorRatio,
        ratio,
        now,
    )
    .with_metadata(detail)])
}

fn ratio_of(reserves: f64, supply: f64) -> Result<f64, FetchError> {
    if supply <= 0.0 {
        return Err(FetchError::terminal(
            FetcherKind::Reserve,
            format!("non-positive supply {supply} in reserve attestation"),
        ));
    }
    Ok(reserves / supply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Chain, PorFeed, PriceFeed, TokenAddress};
    use crate::source::fixture::FixtureSource;
    use crate::source::{BackingReport, FeedRound, StakingState};

    #[tokio::test]
    async fn chainlink_por_sums_across_chains() {
        let source = FixtureSource::new();
        let now = Utc::now();
        source.set_feed(
            Chain::Ethereum,
            "0xagg1",
            FeedRound {
                answer: 60_000.0,
                updated_at: now,
            },
        );
        source.set_feed(
            Chain::Base,
            "0xagg2",
            FeedRound {
                answer: 40_200.0,
                updated_at: now,
            },
        );
        source.set_supply(Chain::Ethereum, "0xtok", 60_000.0);
        source.set_supply(Chain::Base, "0xtok", 40_000.0);

        let config = AssetConfig {
            proof_of_reserve: Some(ProofOfReserve::ChainlinkPor {
                feeds: vec![
                    PorFeed {
                        chain: Chain::Ethereum,
                        aggregator: "0xagg1".to_string(),
                        token_address: "0xtok".to_string(),
                    },
                    PorFeed {
                        chain: Chain::Base,
                        aggregator: "0xagg2".to_string(),
                        token_address: "0xtok".to_string(),
                    },
                ],
            }),
            ..AssetConfig::default()
        };

        let samples = fetch("WBTC", &config, &source, now).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric, MetricName::PorRatio);
        assert!((samples[0].value - 100_200.0 / 100_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn liquid_staking_compares_share_accounting() {
        let source = FixtureSource::new();
        source.set_staking(
            Chain::Ethereum,
            "0xlst",
            StakingState {
                backing_units: 1_005.0,
                issued_units: 1_000.0,
            },
        );

        let config = AssetConfig {
            proof_of_reserve: Some(ProofOfReserve::LiquidStaking {
                staked_token: TokenAddress {
                    chain: Chain::Ethereum,
                    address: "0xlst".to_string(),
                },
            }),
            ..AssetConfig::default()
        };

        let samples = fetch("WSTX", &config, &source, Utc::now()).await.unwrap();
        assert!((samples[0].value - 1.005).abs() < 1e-9);
    }

    #[tokio::test]
    async fn nav_oracle_answer_is_the_ratio() {
        let source = FixtureSource::new();
        let now = Utc::now();
        source.set_feed(
            Chain::Ethereum,
            "0xnav",
            FeedRound {
                answer: 0.998,
                updated_at: now,
            },
        );

        let config = AssetConfig {
            proof_of_reserve: Some(ProofOfReserve::NavBased {
                oracle: PriceFeed {
                    chain: Chain::Ethereum,
                    address: "0xnav".to_string(),
                    name: None,
                },
            }),
            ..AssetConfig::default()
        };

        let samples = fetch("RLX", &config, &source, now).await.unwrap();
        assert_eq!(samples[0].value, 0.998);
    }

    #[tokio::test]
    async fn zero_supply_is_terminal() {
        let source = FixtureSource::new();
        source.set_backing(
            "https://example.com/reserves",
            BackingReport {
                reserves: 10.0,
                supply: 0.0,
            },
        );

        let config = AssetConfig {
            proof_of_reserve: Some(ProofOfReserve::Fractional {
                backing_source: "https://example.com/reserves".to_string(),
            }),
            ..AssetConfig::default()
        };

        let err = fetch("FRX", &config, &source, Utc::now()).await.unwrap_err();
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn absent_section_emits_nothing() {
        let source = FixtureSource::new();
        let samples = fetch("X", &AssetConfig::default(), &source, Utc::now())
            .await
            .unwrap();
        assert!(samples.is_empty());
    }
}
