//! Market fetcher: peg deviation and historical price-risk statistics.
//!
//! Critical ticks need only the current peg, which takes two spot quotes;
//! everything else derives from a year of daily closes. When either side of
//! the peg ratio is missing on the quote source, no peg sample is emitted:
//! absence, not a sentinel.

use chrono::{DateTime, Utc};

use super::{FetchError, FetchResult, FetcherKind};
use crate::asset::AssetConfig;
use crate::catalog::{FrequencyClass, MetricName};
use crate::source::{DataSource, PricePoint, SourceError};
use crate::MetricSample;

const HISTORY_DAYS: u32 = 365;

/// Fewer daily closes than this and the statistics are noise.
const MIN_HISTORY_POINTS: usize = 30;

pub async fn fetch(
    symbol: &str,
    config: &AssetConfig,
    class: FrequencyClass,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let Some(price_risk) = &config.price_risk else {
        return Ok(vec![]);
    };

    if class == FrequencyClass::Critical {
        return peg_sample(symbol, &price_risk.token_price_id, &price_risk.underlying_price_id, source, now)
            .await;
    }

    history_samples(symbol, &price_risk.token_price_id, &price_risk.underlying_price_id, source, now)
        .await
}

async fn peg_sample(
    symbol: &str,
    token_id: &str,
    underlying_id: &str,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let token = match source.spot_price(token_id).await {
        Ok(price) => price,
        Err(SourceError::Missing(_)) => return Ok(vec![]),
        Err(err) => return Err(FetchError::from_source(FetcherKind::Market, err)),
    };
    let underlying = match source.spot_price(underlying_id).await {
        Ok(price) => price,
        Err(SourceError::Missing(_)) => return Ok(vec![]),
        Err(err) => return Err(FetchError::from_source(FetcherKind::Market, err)),
    };

    if underlying <= 0.0 {
        return Ok(vec![]);
    }

    let deviation_pct = (token / underlying - 1.0) * 100.0;
    Ok(vec![MetricSample::new(
        symbol,
        MetricName::PegDeviationPct,
        deviation_pct,
        now,
    )])
}

async fn history_samples(
    symbol: &str,
    token_id: &str,
    underlying_id: &str,
    source: &dyn DataSource,
    now: DateTime<Utc>,
) -> FetchResult {
    let history = source
        .price_history(token_id, HISTORY_DAYS)
        .await
        .map_err(|e| FetchError::from_source(FetcherKind::Market, e))?;

    if history.len() < MIN_HISTORY_POINTS {
        return Err(FetchError::terminal(
            FetcherKind::Market,
            format!("insufficient price history: {} points", history.len()),
        ));
    }

    let prices: Vec<f64> = history.iter().map(|p| p.price).collect();
    let returns = daily_returns(&prices);
    if returns.is_empty() {
        return Err(FetchError::terminal(
            FetcherKind::Market,
            "price history contains no usable returns",
        ));
    }

    let volatility = stddev(&returns) * (365.0_f64).sqrt() * 100.0;
    let p5 = percentile(&returns, 5.0);
    let var95 = -p5 * 100.0;
    let cvar95 = -tail_mean(&returns, p5) * 100.0;

    let mut samples = vec![
        MetricSample::new(symbol, MetricName::VolatilityAnnualizedPct, volatility, now),
        MetricSample::new(symbol, MetricName::Var95Pct, var95, now),
        MetricSample::new(symbol, MetricName::Cvar95Pct, cvar95, now),
    ];

    // Max deviation of the token/underlying ratio over the window. Skipped
    // when the underlying has no history on the quote source.
    match source.price_history(underlying_id, HISTORY_DAYS).await {
        Ok(underlying_history) => {
            if let Some(max_dev) = max_ratio_deviation_pct(&history, &underlying_history) {
                samples.push(MetricSample::new(
                    symbol,
                    MetricName::PriceDeviation365dMaxPct,
                    max_dev,
                    now,
                ));
            }
        }
        Err(SourceError::Missing(_)) => {}
        Err(err) => return Err(FetchError::from_source(FetcherKind::Market, err)),
    }

    Ok(samples)
}

fn daily_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt()
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Mean of the returns at or below the cut; the min return when the tail
/// would otherwise be empty.
fn tail_mean(values: &[f64], cut: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|v| *v <= cut).collect();
    if tail.is_empty() {
        return values
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

fn max_ratio_deviation_pct(token: &[PricePoint], underlying: &[PricePoint]) -> Option<f64> {
    let len = token.len().min(underlying.len());
    if len == 0 {
        return None;
    }

    // Histories are daily series over the same window; align from the end
    // so a shorter underlying history still pairs the recent days.
    let token_tail = &token[token.len() - len..];
    let underlying_tail = &underlying[underlying.len() - len..];

    let mut max_dev: Option<f64> = None;
    for (t, u) in token_tail.iter().zip(underlying_tail.iter()) {
        if u.price <= 0.0 {
            continue;
        }
        let dev = (t.price / u.price - 1.0).abs() * 100.0;
        max_dev = Some(max_dev.map_or(dev, |m: f64| m.max(dev)));
    }
    max_dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::PriceRisk;
    use crate::source::fixture::FixtureSource;
    use chrono::Duration;

    fn config() -> AssetConfig {
        AssetConfig {
            price_risk: Some(PriceRisk {
                token_price_id: "wrapped-bitcoin".to_string(),
                underlying_price_id: "bitcoin".to_string(),
            }),
            ..AssetConfig::default()
        }
    }

    fn history(prices: &[f64]) -> Vec<PricePoint> {
        let start = Utc::now() - Duration::days(prices.len() as i64);
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PricePoint {
                at: start + Duration::days(i as i64),
                price: *p,
            })
            .collect()
    }

    #[tokio::test]
    async fn critical_class_emits_only_peg() {
        let source = FixtureSource::new();
        source.set_spot("wrapped-bitcoin", 67_033.5);
        source.set_spot("bitcoin", 67_000.0);

        let samples = fetch(
            "WBTC",
            &config(),
            FrequencyClass::Critical,
            &source,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric, MetricName::PegDeviationPct);
        assert!((samples[0].value - 0.05).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_underlying_quote_emits_no_peg_sample() {
        let source = FixtureSource::new();
        source.set_spot("wrapped-bitcoin", 67_000.0);

        let samples = fetch(
            "WBTC",
            &config(),
            FrequencyClass::Critical,
            &source,
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn daily_class_computes_history_statistics() {
        let source = FixtureSource::new();
        // Alternate +1% / -1% around 100 for a year.
        let prices: Vec<f64> = (0..365)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        source.set_history("wrapped-bitcoin", history(&prices));
        source.set_history("bitcoin", history(&prices));

        let samples = fetch(
            "WBTC",
            &config(),
            FrequencyClass::Daily,
            &source,
            Utc::now(),
        )
        .await
        .unwrap();

        let by_metric = |m: MetricName| samples.iter().find(|s| s.metric == m).unwrap();

        // Returns alternate ~+1%/-0.99%: stddev ~1%, annualized ~19%.
        let vol = by_metric(MetricName::VolatilityAnnualizedPct).value;
        assert!(vol > 15.0 && vol < 25.0, "vol {vol}");

        let var = by_metric(MetricName::Var95Pct).value;
        assert!(var > 0.8 && var < 1.2, "var {var}");

        let cvar = by_metric(MetricName::Cvar95Pct).value;
        assert!(cvar >= var);

        // Token tracks underlying exactly, so deviation is 0.
        assert_eq!(by_metric(MetricName::PriceDeviation365dMaxPct).value, 0.0);
    }

    #[tokio::test]
    async fn short_history_is_terminal() {
        let source = FixtureSource::new();
        source.set_history("wrapped-bitcoin", history(&[100.0, 101.0, 102.0]));

        let err = fetch(
            "WBTC",
            &config(),
            FrequencyClass::Daily,
            &source,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(!err.retriable);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 50.0), 2.0);
        assert_eq!(percentile(&values, 0.0), 0.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert!((percentile(&values, 5.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn ratio_deviation_picks_worst_day() {
        let token = history(&[100.0, 100.0, 103.0]);
        let underlying = history(&[100.0, 100.0, 100.0]);
        let dev = max_ratio_deviation_pct(&token, &underlying).unwrap();
        assert!((dev - 3.0).abs() < 1e-9);
    }
}
