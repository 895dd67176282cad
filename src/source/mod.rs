//! The upstream data plane the fetchers read from.
//!
//! Everything a fetcher needs from the outside world (oracle rounds, token
//! supplies, pool states, lending-market positions, holder distributions,
//! quote-source prices) comes through the [`DataSource`] trait. The actual
//! wire adapters (JSON-RPC, subgraphs, explorer APIs) live behind an HTTP
//! gateway and can be substituted per deployment; tests use the in-memory
//! [`fixture::FixtureSource`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{Chain, DexPool, LendingConfig};

pub mod fixture;
pub mod http;

/// Failure while reading upstream data. The `is_retriable` classification
/// drives the dispatcher's retry decision.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Deadline or connect timeout.
    Timeout(String),
    /// Upstream asked us to back off.
    RateLimited(String),
    /// Upstream returned an error status.
    Upstream { status: u16, message: String },
    /// Response did not match the expected shape.
    Decode(String),
    /// The requested entity does not exist on this source.
    Missing(String),
    /// Connection-level failure.
    Transport(String),
}

impl SourceError {
    pub fn is_retriable(&self) -> bool {
        match self {
            SourceError::Timeout(_) | SourceError::RateLimited(_) | SourceError::Transport(_) => {
                true
            }
            SourceError::Upstream { status, .. } => *status >= 500,
            SourceError::Decode(_) | SourceError::Missing(_) => false,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Timeout(msg) => write!(f, "upstream timeout: {msg}"),
            SourceError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            SourceError::Upstream { status, message } => {
                write!(f, "upstream error {status}: {message}")
            }
            SourceError::Decode(msg) => write!(f, "response decode error: {msg}"),
            SourceError::Missing(msg) => write!(f, "not found upstream: {msg}"),
            SourceError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// One oracle round. `answer` is already scaled to a plain decimal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRound {
    pub answer: f64,
    pub updated_at: DateTime<Utc>,
}

/// LST share accounting: underlying at stake vs. issued wrapper supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingState {
    pub backing_units: f64,
    pub issued_units: f64,
}

/// Reserves vs. supply as reported by a backing source or dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackingReport {
    pub reserves: f64,
    pub supply: f64,
}

/// Point-in-time view of one DEX pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub tvl_usd: f64,
    /// USD value of the asset-side reserve, the depth a trade executes into.
    pub token_reserve_usd: f64,
    /// LP position sizes, any unit, used for concentration measures.
    pub lp_balances: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionHealth {
    pub debt_usd: f64,
    pub health_factor: f64,
}

/// Point-in-time view of one lending market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingMarketState {
    pub supplied_usd: f64,
    pub borrowed_usd: f64,
    pub looped_supply_usd: f64,
    pub positions: Vec<PositionHealth>,
}

/// Token-holder balances on one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderSet {
    pub balances: Vec<f64>,
    pub total_supply: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub price: f64,
}

/// Logical fetch interface over the external dependencies.
///
/// Implementations must be cheap to share (`Send + Sync`); one instance
/// serves every concurrent work unit of a tick.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn feed_round(&self, chain: Chain, address: &str) -> Result<FeedRound, SourceError>;

    async fn token_supply(&self, chain: Chain, address: &str) -> Result<f64, SourceError>;

    async fn staking_state(&self, chain: Chain, address: &str)
        -> Result<StakingState, SourceError>;

    async fn backing_report(&self, source_url: &str) -> Result<BackingReport, SourceError>;

    async fn scrape_reserves(
        &self,
        url: &str,
        parser_hint: &str,
    ) -> Result<BackingReport, SourceError>;

    async fn pool_state(&self, pool: &DexPool) -> Result<PoolState, SourceError>;

    async fn lending_market(
        &self,
        market: &LendingConfig,
    ) -> Result<LendingMarketState, SourceError>;

    async fn holder_set(&self, chain: Chain, address: &str) -> Result<HolderSet, SourceError>;

    async fn spot_price(&self, quote_id: &str) -> Result<f64, SourceError>;

    /// Daily closes for the last `days` days, oldest first.
    async fn price_history(
        &self,
        quote_id: &str,
        days: u32,
    ) -> Result<Vec<PricePoint>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(SourceError::Timeout("t".into()).is_retriable());
        assert!(SourceError::RateLimited("r".into()).is_retriable());
        assert!(SourceError::Transport("t".into()).is_retriable());
        assert!(SourceError::Upstream {
            status: 503,
            message: "unavailable".into()
        }
        .is_retriable());

        assert!(!SourceError::Upstream {
            status: 400,
            message: "bad request".into()
        }
        .is_retriable());
        assert!(!SourceError::Decode("schema".into()).is_retriable());
        assert!(!SourceError::Missing("feed".into()).is_retriable());
    }
}
