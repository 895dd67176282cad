//! Dispatcher: expands a schedule tick into work units and runs them.
//!
//! One tick takes a registry snapshot, computes the (kind, scope) units
//! implied by the frequency class and each asset's declared config, and
//! fans them out over a bounded worker pool. Every unit carries its own
//! deadline; retriable failures are retried with exponential backoff and
//! jitter; no unit failure blocks another. Returned samples are filtered to
//! the tick class's metric set, appended to the store and fed to the alert
//! engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::alerts::AlertEngine;
use crate::asset::AssetConfig;
use crate::catalog::FrequencyClass;
use crate::fetch::{run_fetch, FetchError, FetchScope, FetcherKind};
use crate::registry::AssetRegistry;
use crate::settings::Settings;
use crate::source::DataSource;
use crate::storage::StorageBackend;

/// One fetch to perform for one asset.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub asset: String,
    pub kind: FetcherKind,
    pub scope: FetchScope,
}

/// A unit that failed after exhausting its retries (or terminally).
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub asset: String,
    pub kind: FetcherKind,
    pub scope: String,
    pub retriable: bool,
    pub attempts: u32,
    pub cause: String,
}

/// What one tick did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub class: FrequencyClass,
    pub started_at: DateTime<Utc>,
    pub assets_processed: usize,
    pub units_dispatched: usize,
    pub samples_stored: usize,
    pub alerts_triggered: usize,
    pub failures: Vec<UnitFailure>,
    /// False when the tick hit its outer deadline, lost the store, or had
    /// work units fail after exhausting their retries.
    pub complete: bool,
}

/// Expand the work a frequency class implies for one asset configuration.
pub fn work_units(class: FrequencyClass, config: &AssetConfig) -> Vec<(FetcherKind, FetchScope)> {
    let mut units = Vec::new();

    match class {
        FrequencyClass::Critical => {
            for i in 0..config.price_feeds.len() {
                units.push((FetcherKind::Oracle, FetchScope::PriceFeed(i)));
            }
            for i in 0..config.cross_chain_feeds.len() {
                units.push((FetcherKind::Oracle, FetchScope::CrossFeed(i)));
            }
            if config.proof_of_reserve.is_some() {
                units.push((FetcherKind::Reserve, FetchScope::Asset));
            }
            if config.price_risk.is_some() {
                units.push((FetcherKind::Market, FetchScope::Asset));
            }
        }
        FrequencyClass::High => {
            for i in 0..config.dex_pools.len() {
                units.push((FetcherKind::Liquidity, FetchScope::DexPool(i)));
            }
            for i in 0..config.lending_configs.len() {
                units.push((FetcherKind::Lending, FetchScope::LendingMarket(i)));
            }
        }
        FrequencyClass::Medium => {
            if !config.token_addresses.is_empty() {
                units.push((FetcherKind::Distribution, FetchScope::Asset));
            }
            for i in 0..config.lending_configs.len() {
                units.push((FetcherKind::Lending, FetchScope::LendingMarket(i)));
            }
            for i in 0..config.dex_pools.len() {
                units.push((FetcherKind::Liquidity, FetchScope::DexPool(i)));
            }
            if config.cross_chain_feeds.len() >= 2 {
                units.push((FetcherKind::Oracle, FetchScope::CrossChainPair));
            }
        }
        FrequencyClass::Daily => {
            if config.price_risk.is_some() {
                units.push((FetcherKind::Market, FetchScope::Asset));
            }
        }
    }

    units
}

pub struct Dispatcher {
    registry: Arc<AssetRegistry>,
    backend: Arc<dyn StorageBackend>,
    source: Arc<dyn DataSource>,
    alerts: Arc<AlertEngine>,
    settings: Settings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AssetRegistry>,
        backend: Arc<dyn StorageBackend>,
        source: Arc<dyn DataSource>,
        alerts: Arc<AlertEngine>,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            backend,
            source,
            alerts,
            settings,
        }
    }

    /// Run one tick of the given frequency class.
    #[instrument(skip(self), fields(class = %class))]
    pub async fn run_tick(&self, class: FrequencyClass, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome {
            class,
            started_at: now,
            assets_processed: 0,
            units_dispatched: 0,
            samples_stored: 0,
            alerts_triggered: 0,
            failures: Vec::new(),
            complete: true,
        };

        // Snapshot the registry at tick start; config changes made during
        // the tick are picked up by the next one.
        let assets = match self.registry.list_enabled().await {
            Ok(assets) => assets,
            Err(err) => {
                error!("tick aborted, registry unavailable: {err}");
                outcome.complete = false;
                return outcome;
            }
        };
        outcome.assets_processed = assets.len();

        let semaphore = Arc::new(Semaphore::new(self.settings.worker_pool_size.max(1)));
        type UnitReturn = (WorkUnit, Result<Vec<crate::MetricSample>, FetchError>, u32);
        let mut join_set: JoinSet<UnitReturn> = JoinSet::new();

        for asset in assets {
            let config = Arc::new(asset.config);
            for (kind, scope) in work_units(class, &config) {
                let unit = WorkUnit {
                    asset: asset.symbol.clone(),
                    kind,
                    scope,
                };
                outcome.units_dispatched += 1;

                let config = config.clone();
                let source = self.source.clone();
                let semaphore = semaphore.clone();
                let deadline = self.settings.unit_deadline(class);
                let max_retries = self.settings.fetch_max_retries;
                let retry_base = self.settings.retry_base;
                let retry_cap = self.settings.retry_cap;

                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                unit.clone(),
                                Err(FetchError::retriable(unit.kind, "worker pool closed")),
                                0,
                            )
                        }
                    };

                    let (result, attempts) = run_unit(
                        &unit, &config, class, source.as_ref(), deadline, max_retries, retry_base,
                        retry_cap, now,
                    )
                    .await;
                    (unit, result, attempts)
                });
            }
        }

        let tick_deadline =
            tokio::time::Instant::now() + self.settings.tick_deadline(class);
        let mut storage_down = false;

        loop {
            let joined = tokio::time::timeout_at(tick_deadline, join_set.join_next()).await;
            let joined = match joined {
                Ok(joined) => joined,
                Err(_) => {
                    let outstanding = join_set.len();
                    join_set.abort_all();
                    outcome.complete = false;
                    warn!(
                        class = %class,
                        outstanding,
                        "incomplete tick: outer deadline exceeded, cancelling outstanding units"
                    );
                    break;
                }
            };

            let (unit, result, attempts) = match joined {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(join_err)) => {
                    if !join_err.is_cancelled() {
                        error!("work unit task panicked: {join_err}");
                    }
                    continue;
                }
            };

            match result {
                Ok(samples) => {
                    let class_metrics = class.metrics();
                    let samples: Vec<_> = samples
                        .into_iter()
                        .filter(|s| class_metrics.contains(&s.metric))
                        .collect();
                    if samples.is_empty() || storage_down {
                        continue;
                    }

                    match self.backend.append_metrics(samples.clone()).await {
                        Ok(()) => {
                            outcome.samples_stored += samples.len();
                            for sample in &samples {
                                match self.alerts.evaluate(sample).await {
                                    Ok(written) => outcome.alerts_triggered += written,
                                    // Threshold evaluation never blocks the
                                    // sample write; it is already persisted.
                                    Err(err) => warn!(
                                        asset = %sample.asset_symbol,
                                        metric = %sample.metric,
                                        "threshold evaluation failed: {err}"
                                    ),
                                }
                            }
                        }
                        Err(err) => {
                            storage_down = true;
                            outcome.complete = false;
                            error!(
                                class = %class,
                                "incomplete tick: storage unavailable, dropping remaining writes: {err}"
                            );
                        }
                    }
                }
                Err(fetch_err) => {
                    warn!(
                        asset = %unit.asset,
                        kind = %unit.kind,
                        scope = %unit.scope,
                        retriable = fetch_err.retriable,
                        "work unit failed: {}",
                        fetch_err.cause
                    );
                    outcome.failures.push(UnitFailure {
                        asset: unit.asset,
                        kind: unit.kind,
                        scope: unit.scope.to_string(),
                        retriable: fetch_err.retriable,
                        attempts,
                        cause: fetch_err.cause,
                    });
                }
            }
        }

        if !outcome.failures.is_empty() {
            outcome.complete = false;
            warn!(
                class = %class,
                failed_units = outcome.failures.len(),
                "incomplete tick: some work units failed after retries"
            );
        }

        debug!(
            class = %class,
            units = outcome.units_dispatched,
            stored = outcome.samples_stored,
            alerts = outcome.alerts_triggered,
            failures = outcome.failures.len(),
            complete = outcome.complete,
            "tick finished"
        );

        outcome
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_unit(
    unit: &WorkUnit,
    config: &AssetConfig,
    class: FrequencyClass,
    source: &dyn DataSource,
    deadline: std::time::Duration,
    max_retries: u32,
    retry_base: std::time::Duration,
    retry_cap: std::time::Duration,
    now: DateTime<Utc>,
) -> (Result<Vec<crate::MetricSample>, FetchError>, u32) {
    let mut attempt: u32 = 0;

    loop {
        let result = match tokio::time::timeout(
            deadline,
            run_fetch(unit.kind, &unit.asset, config, unit.scope, class, source, now),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::retriable(
                unit.kind,
                format!("unit deadline of {deadline:?} exceeded"),
            )),
        };

        match result {
            Ok(samples) => return (Ok(samples), attempt + 1),
            Err(err) if err.retriable && attempt < max_retries => {
                let delay = backoff_with_jitter(retry_base, retry_cap, attempt);
                debug!(
                    asset = %unit.asset,
                    kind = %unit.kind,
                    attempt,
                    "retrying in {delay:?}: {}",
                    err.cause
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return (Err(err), attempt + 1),
        }
    }
}

/// Exponential backoff (base doubling, capped) with +/-25% jitter.
fn backoff_with_jitter(
    base: std::time::Duration,
    cap: std::time::Duration,
    attempt: u32,
) -> std::time::Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(cap.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    std::time::Duration::from_secs_f64(capped * jitter)
}
