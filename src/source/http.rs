//! HTTP gateway implementation of [`DataSource`].
//!
//! The gateway terminates the wire-level adapters (JSON-RPC, subgraphs,
//! explorer APIs, the off-chain quote source) and exposes them as plain
//! JSON endpoints. The client here is reused across requests and carries a
//! per-request timeout well below any work-unit deadline.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::trace;

use super::{
    BackingReport, DataSource, FeedRound, HolderSet, LendingMarketState, PoolState, PricePoint,
    SourceError, StakingState,
};
use crate::asset::{Chain, DexPool, LendingConfig};

pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };

        trace!("requesting {url}");

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(url.clone())
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => SourceError::Missing(url),
                429 => SourceError::RateLimited(url),
                code => SourceError::Upstream {
                    status: code,
                    message: url,
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct SupplyDto {
    supply: f64,
}

#[derive(Deserialize)]
struct SpotDto {
    price: f64,
}

#[derive(Deserialize)]
struct HistoryDto {
    points: Vec<PricePoint>,
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn feed_round(&self, chain: Chain, address: &str) -> Result<FeedRound, SourceError> {
        self.get_json(&format!("/chains/{chain}/feeds/{address}"), &[])
            .await
    }

    async fn token_supply(&self, chain: Chain, address: &str) -> Result<f64, SourceError> {
        let dto: SupplyDto = self
            .get_json(&format!("/chains/{chain}/tokens/{address}/supply"), &[])
            .await?;
        Ok(dto.supply)
    }

    async fn staking_state(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<StakingState, SourceError> {
        self.get_json(&format!("/chains/{chain}/staking/{address}"), &[])
            .await
    }

    async fn backing_report(&self, source_url: &str) -> Result<BackingReport, SourceError> {
        self.get_json(source_url, &[]).await
    }

    async fn scrape_reserves(
        &self,
        url: &str,
        parser_hint: &str,
    ) -> Result<BackingReport, SourceError> {
        self.get_json("/scrape/reserves", &[("url", url), ("hint", parser_hint)])
            .await
    }

    async fn pool_state(&self, pool: &DexPool) -> Result<PoolState, SourceError> {
        self.get_json(
            &format!(
                "/chains/{}/pools/{}/{}",
                pool.chain, pool.protocol, pool.pool_address
            ),
            &[],
        )
        .await
    }

    async fn lending_market(
        &self,
        market: &LendingConfig,
    ) -> Result<LendingMarketState, SourceError> {
        self.get_json(
            &format!(
                "/chains/{}/lending/{}/{}",
                market.chain, market.protocol, market.token_address
            ),
            &[],
        )
        .await
    }

    async fn holder_set(&self, chain: Chain, address: &str) -> Result<HolderSet, SourceError> {
        self.get_json(&format!("/chains/{chain}/tokens/{address}/holders"), &[])
            .await
    }

    async fn spot_price(&self, quote_id: &str) -> Result<f64, SourceError> {
        let dto: SpotDto = self.get_json(&format!("/quotes/{quote_id}/spot"), &[]).await?;
        Ok(dto.price)
    }

    async fn price_history(
        &self,
        quote_id: &str,
        days: u32,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let days = days.to_string();
        let dto: HistoryDto = self
            .get_json(
                &format!("/quotes/{quote_id}/history"),
                &[("days", days.as_str())],
            )
            .await?;
        Ok(dto.points)
    }
}
