//! Oracle fetcher: feed freshness and cross-chain lag.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{FetchError, FetchResult, FetchScope, FetcherKind};
use crate::asset::{AssetConfig, PriceFeed};
use crate::catalog::MetricName;
use crate::source::{DataSource, SourceError};
use crate::MetricSample;

/// Freshness reported for a feed that exists but cannot be read right now.
/// One week, in minutes; far beyond every staleness threshold while staying
/// finite for storage and scoring.
pub const UNREADABLE_FEED_CLAMP_MINUTES: f64 = 10_080.0;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    scope: FetchScope,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    match scope {
        FetchScope::PriceFeed(i) => match config.price_feeds.get(i) {
            Some(feed) => freshness_sample(symbol, feed, source, now).await.map(|s| vec![s]),
            None => Ok(vec![]),
        },
        FetchScope::CrossFeed(i) => match config.cross_chain_feeds.get(i) {
            Some(feed) => freshness_sample(symbol, feed, source, now).await.map(|s| vec![s]),
            None => Ok(vec![]),
        },
        FetchScope::CrossChainPair => cross_chain_lag(symbol, config, source, now).await,
        _ => Ok(vec![]),
    }
}

async fn freshness_sample(
    symbol: &str,
    feed: &PriceFeed,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> Result<MetricSample, FetchError> {
    let minutes = match source.feed_round(feed.chain, &feed.address).await {
        Ok(round) => {
            let elapsed = now.signed_duration_since(round.updated_at);
            (elapsed.num_seconds() as f64 / 60.0)
                .max(0.0)
                .min(UNREADABLE_FEED_CLAMP_MINUTES)
        }
        // The feed is configured, hence known-existent; an unreadable one
        // reports as maximally stale rather than absent.
        Err(SourceError::Missing(_)) => UNREADABLE_FEED_CLAMP_MINUTES,
        Err(err) => return Err(FetchError::from_source(FetcherKind::Oracle, err)),
    };

    let mut metadata = json!({ "address": feed.address });
    if let Some(name) = &feed.name {
        metadata["name"] = json!(name);
    }

    Ok(
        MetricSample::new(symbol, MetricName::OracleFreshnessMinutes, minutes, now)
            .on_chain(feed.chain)
            .with_metadata(metadata),
    )
}

/// Lag between the newest and oldest update among the cross-chain feeds.
async fn cross_chain_lag(
    symbol: &str,
    config: &AssetConfig,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    if config.cross_chain_feeds.len() < 2 {
        return Ok(vec![]);
    }

    let mut updates: Vec<(crate::asset::Chain, DateTime<Utc>)> = Vec::new();
    for feed in &config.cross_chain_feeds {
        let round = source
            .feed_round(feed.chain, &feed.address)
            .await
            .map_err(|e| FetchError::from_source(FetcherKind::Oracle, e))?;
        updates.push((feed.chain, round.updated_at));
    }

    let newest = updates.iter().max_by_key(|(_, at)| *at).copied();
    let oldest = updates.iter().min_by_key(|(_, at)| *at).copied();
    let (Some((newest_chain, newest_at)), Some((oldest_chain, oldest_at))) = (newest, oldest)
    else {
        return Ok(vec![]);
    };

    let lag_minutes = newest_at.signed_duration_since(oldest_at).num_seconds() as f64 / 60.0;

    Ok(vec![MetricSample::new(
        symbol,
        MetricName::CrossChainOracleLagMinutes,
        lag_minutes.abs(),
        now,
    )
    .with_metadata(json!({
        "newest_chain": newest_chain.as_str(),
        "oldest_chain": oldest_chain.as_str(),
    }))])
}
