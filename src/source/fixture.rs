//! Deterministic in-memory [`DataSource`].
//!
//! Serves canned responses keyed the same way the gateway addresses them.
//! Entries can be replaced between ticks, which is how the integration
//! tests move a metric across a threshold. Anything not configured returns
//! `Missing`; an address can also be primed to fail with a specific error
//! to exercise retry paths.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    BackingReport, DataSource, FeedRound, HolderSet, LendingMarketState, PoolState, PricePoint,
    SourceError, StakingState,
};
use crate::asset::{Chain, DexPool, LendingConfig};

#[derive(Default)]
struct Inner {
    feeds: HashMap<(Chain, String), FeedRound>,
    supplies: HashMap<(Chain, String), f64>,
    staking: HashMap<(Chain, String), StakingState>,
    backing: HashMap<String, BackingReport>,
    pools: HashMap<(Chain, String), PoolState>,
    lending: HashMap<(Chain, String), LendingMarketState>,
    holders: HashMap<(Chain, String), HolderSet>,
    spots: HashMap<String, f64>,
    histories: HashMap<String, Vec<PricePoint>>,
    /// Keys primed to fail on any lookup, with the error to return.
    failures: HashMap<String, SourceError>,
}

#[derive(Default)]
pub struct FixtureSource {
    inner: RwLock<Inner>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap()
    }

    fn check_failure(&self, key: &str) -> Result<(), SourceError> {
        if let Some(err) = self.read().failures.get(key) {
            return Err(err.clone());
        }
        Ok(())
    }

    /// Prime a key (an address, pool address, or quote id) to fail.
    pub fn fail_with(&self, key: &str, error: SourceError) {
        self.write().failures.insert(key.to_string(), error);
    }

    pub fn clear_failure(&self, key: &str) {
        self.write().failures.remove(key);
    }

    pub fn set_feed(&self, chain: Chain, address: &str, round: FeedRound) {
        self.write().feeds.insert((chain, address.to_string()), round);
    }

    pub fn set_supply(&self, chain: Chain, address: &str, supply: f64) {
        self.write()
            .supplies
            .insert((chain, address.to_string()), supply);
    }

    pub fn set_staking(&self, chain: Chain, address: &str, state: StakingState) {
        self.write()
            .staking
            .insert((chain, address.to_string()), state);
    }

    pub fn set_backing(&self, url: &str, report: BackingReport) {
        self.write().backing.insert(url.to_string(), report);
    }

    pub fn set_pool(&self, chain: Chain, address: &str, state: PoolState) {
        self.write().pools.insert((chain, address.to_string()), state);
    }

    pub fn set_lending(&self, chain: Chain, token_address: &str, state: LendingMarketState) {
        self.write()
            .lending
            .insert((chain, token_address.to_string()), state);
    }

    pub fn set_holders(&self, chain: Chain, address: &str, holders: HolderSet) {
        self.write()
            .holders
            .insert((chain, address.to_string()), holders);
    }

    pub fn set_spot(&self, quote_id: &str, price: f64) {
        self.write().spots.insert(quote_id.to_string(), price);
    }

    pub fn set_history(&self, quote_id: &str, points: Vec<PricePoint>) {
        self.write().histories.insert(quote_id.to_string(), points);
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    async fn feed_round(&self, chain: Chain, address: &str) -> Result<FeedRound, SourceError> {
        self.check_failure(address)?;
        self.read()
            .feeds
            .get(&(chain, address.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("feed {chain}/{address}")))
    }

    async fn token_supply(&self, chain: Chain, address: &str) -> Result<f64, SourceError> {
        self.check_failure(address)?;
        self.read()
            .supplies
            .get(&(chain, address.to_string()))
            .copied()
            .ok_or_else(|| SourceError::Missing(format!("supply {chain}/{address}")))
    }

    async fn staking_state(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<StakingState, SourceError> {
        self.check_failure(address)?;
        self.read()
            .staking
            .get(&(chain, address.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("staking {chain}/{address}")))
    }

    async fn backing_report(&self, source_url: &str) -> Result<BackingReport, SourceError> {
        self.check_failure(source_url)?;
        self.read()
            .backing
            .get(source_url)
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("backing {source_url}")))
    }

    async fn scrape_reserves(
        &self,
        url: &str,
        _parser_hint: &str,
    ) -> Result<BackingReport, SourceError> {
        self.backing_report(url).await
    }

    async fn pool_state(&self, pool: &DexPool) -> Result<PoolState, SourceError> {
        self.check_failure(&pool.pool_address)?;
        self.read()
            .pools
            .get(&(pool.chain, pool.pool_address.clone()))
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("pool {}", pool.pool_address)))
    }

    async fn lending_market(
        &self,
        market: &LendingConfig,
    ) -> Result<LendingMarketState, SourceError> {
        self.check_failure(&market.token_address)?;
        self.read()
            .lending
            .get(&(market.chain, market.token_address.clone()))
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("lending {}", market.anchor())))
    }

    async fn holder_set(&self, chain: Chain, address: &str) -> Result<HolderSet, SourceError> {
        self.check_failure(address)?;
        self.read()
            .holders
            .get(&(chain, address.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("holders {chain}/{address}")))
    }

    async fn spot_price(&self, quote_id: &str) -> Result<f64, SourceError> {
        self.check_failure(quote_id)?;
        self.read()
            .spots
            .get(quote_id)
            .copied()
            .ok_or_else(|| SourceError::Missing(format!("quote {quote_id}")))
    }

    async fn price_history(
        &self,
        quote_id: &str,
        _days: u32,
    ) -> Result<Vec<PricePoint>, SourceError> {
        self.check_failure(quote_id)?;
        self.read()
            .histories
            .get(quote_id)
            .cloned()
            .ok_or_else(|| SourceError::Missing(format!("history {quote_id}")))
    }
}
