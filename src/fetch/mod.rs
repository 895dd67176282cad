//! Fetchers: the pluggable units that turn upstream reads into metric
//! samples.
//!
//! Each fetcher kind is a tagged variant and routing is a match on the tag;
//! adding a kind is additive. A single invocation either returns all of its
//! samples or none. Fetchers tolerate missing config sections by returning
//! an empty sample list, and classify upstream failures as retriable or
//! terminal so the dispatcher knows whether to retry.
//!
//! The market and lending fetchers emit supersets of what a single
//! frequency class needs (the origin of a number doesn't depend on the
//! tick that asked for it); the dispatcher filters returned samples down
//! to the tick class's metric set.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::asset::AssetConfig;
use crate::catalog::FrequencyClass;
use crate::source::{DataSource, SourceError};
use crate::MetricSample;

pub mod distribution;
pub mod lending;
pub mod liquidity;
pub mod market;
pub mod oracle;
pub mod reserve;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetcherKind {
    Oracle,
    Reserve,
    Liquidity,
    Lending,
    Distribution,
    Market,
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetcherKind::Oracle => "oracle",
            FetcherKind::Reserve => "reserve",
            FetcherKind::Liquidity => "liquidity",
            FetcherKind::Lending => "lending",
            FetcherKind::Distribution => "distribution",
            FetcherKind::Market => "market",
        };
        write!(f, "{name}")
    }
}

/// Narrows a fetch to one sub-target of the asset config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    /// The whole asset (reserve, market, distribution).
    Asset,
    /// One entry of `price_feeds`.
    PriceFeed(usize),
    /// One entry of `cross_chain_feeds`.
    CrossFeed(usize),
    /// The full cross-chain feed set, for lag measurement.
    CrossChainPair,
    /// One entry of `lending_configs`.
    LendingMarket(usize),
    /// One entry of `dex_pools`.
    DexPool(usize),
}

impl fmt::Display for FetchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchScope::Asset => write!(f, "asset"),
            FetchScope::PriceFeed(i) => write!(f, "price_feed[{i}]"),
            FetchScope::CrossFeed(i) => write!(f, "cross_chain_feed[{i}]"),
            FetchScope::CrossChainPair => write!(f, "cross_chain_pair"),
            FetchScope::LendingMarket(i) => write!(f, "lending_market[{i}]"),
            FetchScope::DexPool(i) => write!(f, "dex_pool[{i}]"),
        }
    }
}

/// Failure of one work unit. Contained by the dispatcher; retriable errors
/// may be retried, terminal ones are recorded and skipped.
#[derive(Debug)]
pub struct FetchError {
    pub kind: FetcherKind,
    pub retriable: bool,
    pub cause: String,
}

impl FetchError {
    pub fn from_source(kind: FetcherKind, err: SourceError) -> Self {
        Self {
            kind,
            retriable: err.is_retriable(),
            cause: err.to_string(),
        }
    }

    pub fn terminal(kind: FetcherKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: false,
            cause: cause.into(),
        }
    }

    pub fn retriable(kind: FetcherKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: true,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = if self.retriable { "retriable" } else { "terminal" };
        write!(f, "{} fetch failed ({class}): {}", self.kind, self.cause)
    }
}

impl std::error::Error for FetchError {}

pub type FetchResult = Result<Vec<MetricSample>, FetchError>;

/// Route one work unit to its fetcher implementation.
pub async fn run_fetch(
    kind: FetcherKind,
    symbol: &str,
    config: &AssetConfig,
    scope: FetchScope,
    class: FrequencyClass,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    match kind {
        FetcherKind::Oracle => oracle::fetch(symbol, config, scope, source, now).await,
        FetcherKind::Reserve => reserve::fetch(symbol, config, source, now).await,
        FetcherKind::Liquidity => liquidity::fetch(symbol, config, scope, source, now).await,
        FetcherKind::Lending => lending::fetch(symbol, config, scope, source, now).await,
        FetcherKind::Distribution => distribution::fetch(symbol, config, source, now).await,
        FetcherKind::Market => market::fetch(symbol, config, class, source, now).await,
    }
}

// === concentration measures shared by liquidity and distribution ===

/// Herfindahl-Hirschman index over position sizes, scaled 0-10000.
pub(crate) fn herfindahl(balances: &[f64]) -> f64 {
    let total: f64 = balances.iter().filter(|b| **b > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    balances
        .iter()
        .filter(|b| **b > 0.0)
        .map(|b| {
            let share = b / total;
            share * share
        })
        .sum::<f64>()
        * 10_000.0
}

/// Share of the total held by the `n` largest positions, in percent.
pub(crate) fn top_share_pct(balances: &[f64], n: usize) -> f64 {
    let total: f64 = balances.iter().filter(|b| **b > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = balances.iter().copied().filter(|b| *b > 0.0).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted.iter().take(n).sum::<f64>() / total * 100.0
}

/// Gini coefficient over position sizes. 0 = uniform, 1 = single holder.
pub(crate) fn gini(balances: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = balances.iter().copied().filter(|b| *b > 0.0).collect();
    if sorted.len() < 2 {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len() as f64;
    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, b)| (i as f64 + 1.0) * b)
        .sum();

    (2.0 * weighted) / (n * total) - (n + 1.0) / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn herfindahl_of_monopoly_is_ten_thousand() {
        assert_eq!(herfindahl(&[42.0]), 10_000.0);
    }

    #[test]
    fn herfindahl_of_uniform_positions() {
        // Four equal holders: 4 * (0.25)^2 * 10000 = 2500.
        let hhi = herfindahl(&[10.0, 10.0, 10.0, 10.0]);
        assert!((hhi - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn top_share_takes_largest_first() {
        let balances = [1.0, 50.0, 2.0, 47.0];
        let pct = top_share_pct(&balances, 2);
        assert!((pct - 97.0).abs() < 1e-9);
    }

    #[test]
    fn gini_bounds() {
        assert_eq!(gini(&[5.0]), 0.0);

        let uniform = gini(&[1.0, 1.0, 1.0, 1.0]);
        assert!(uniform.abs() < 1e-9);

        // One whale among dust approaches 1.
        let concentrated = gini(&[0.0001, 0.0001, 0.0001, 1_000_000.0]);
        assert!(concentrated > 0.74);
    }

    #[test]
    fn zero_balances_are_ignored() {
        assert_eq!(herfindahl(&[0.0, 0.0]), 0.0);
        assert_eq!(top_share_pct(&[0.0], 10), 0.0);
    }
}
