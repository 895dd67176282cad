//! End-to-end scoring scenarios: metrics go into the store, the engine
//! captures a snapshot and produces the expected score, grade and breaker
//! list.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use risk_monitoring::asset::{
    AssetConfig, AssetType, Audit, AuthorityKind, CustodyModel, Governance, GovernanceRole,
    TokenAddress,
};
use risk_monitoring::catalog::MetricName;
use risk_monitoring::registry::{AssetRegistry, RegisteredAsset};
use risk_monitoring::scoring::{Grade, ScoreEngine};
use risk_monitoring::storage::memory::MemoryBackend;
use risk_monitoring::storage::StorageBackend;
use risk_monitoring::{Chain, MetricSample};

/// Wrapped BTC in excellent shape: top-tier audit, mature code, strong
/// multisig governance, healthy metrics across the board.
fn wrapped_btc_config(now: DateTime<Utc>) -> AssetConfig {
    AssetConfig {
        asset_type: AssetType::Wrapped,
        underlying: Some("BTC".to_string()),
        decimals: 8,
        token_addresses: vec![TokenAddress {
            chain: Chain::Ethereum,
            address: "0xc02a".to_string(),
        }],
        audit_data: vec![Audit {
            auditor: "Trail of Bits".to_string(),
            date: (now - Duration::days(100)).date_naive(),
            critical_issues_unresolved: 0,
            high_issues_unresolved: 0,
        }],
        deployment_date: Some((now - Duration::days(900)).date_naive()),
        governance: Some(Governance {
            roles: vec![GovernanceRole {
                role_name: "owner".to_string(),
                authority_kind: AuthorityKind::Multisig,
                role_weight: 3.0,
                address: Some("0xsafe".to_string()),
                threshold: Some(4),
                signer_count: Some(7),
                dao_safeguards: None,
            }],
            has_timelock: true,
            timelock_hours: 72.0,
            custody_model: CustodyModel::RegulatedInsured,
            has_blacklist: false,
            blacklist_control: Default::default(),
        }),
        ..AssetConfig::default()
    }
}

fn healthy_metrics() -> Vec<(MetricName, f64)> {
    vec![
        (MetricName::PorRatio, 1.001),
        (MetricName::OracleFreshnessMinutes, 2.0),
        (MetricName::CrossChainOracleLagMinutes, 1.0),
        (MetricName::PegDeviationPct, 0.05),
        (MetricName::VolatilityAnnualizedPct, 25.0),
        (MetricName::Var95Pct, 3.2),
        (MetricName::Slippage100kPct, 0.15),
        (MetricName::Slippage500kPct, 0.4),
        (MetricName::Hhi, 1200.0),
        (MetricName::UtilizationRate, 55.0),
        (MetricName::ClrPct, 3.0),
        (MetricName::RlrPct, 4.0),
    ]
}

async fn store_metrics(
    backend: &MemoryBackend,
    asset: &str,
    now: DateTime<Utc>,
    metrics: &[(MetricName, f64)],
) {
    let samples: Vec<MetricSample> = metrics
        .iter()
        .map(|(metric, value)| MetricSample::new(asset, *metric, *value, now))
        .collect();
    backend.append_metrics(samples).await.unwrap();
}

fn registered(symbol: &str, config: AssetConfig, now: DateTime<Utc>) -> RegisteredAsset {
    RegisteredAsset {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        config,
        enabled: true,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn fully_qualified_wrapped_btc_grades_a() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();

    store_metrics(&backend, "WBTC", now, &healthy_metrics()).await;

    let engine = ScoreEngine::new(backend.clone());
    let asset = registered("WBTC", wrapped_btc_config(now), now);
    let report = engine.score_asset(&asset, now).await.unwrap();

    assert!(report.qualified);
    assert_eq!(report.categories.len(), 6);

    let outcome = report.outcome.unwrap();
    assert!(
        outcome.raw_score >= 85.0,
        "raw score {} below A threshold",
        outcome.raw_score
    );
    assert_eq!(outcome.grade, Grade::A);
    assert!(outcome.breakers.is_empty());
    assert_eq!(outcome.final_score, outcome.raw_score);
}

#[tokio::test]
async fn undercollateralized_reserve_caps_at_grade_c() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();

    let mut metrics = healthy_metrics();
    for entry in metrics.iter_mut() {
        if entry.0 == MetricName::PorRatio {
            entry.1 = 0.97;
        }
    }
    store_metrics(&backend, "WBTC", now, &metrics).await;

    let engine = ScoreEngine::new(backend.clone());
    let asset = registered("WBTC", wrapped_btc_config(now), now);
    let report = engine.score_asset(&asset, now).await.unwrap();

    assert!(report.qualified, "primary checks still pass");

    let outcome = report.outcome.unwrap();
    assert!(outcome.raw_score >= 70.0);
    assert_eq!(outcome.final_score, 69.0);
    assert_eq!(outcome.grade, Grade::C);
    assert_eq!(outcome.breakers.len(), 1);
    assert_eq!(outcome.breakers[0].name, "Reserve undercollateralized");
}

#[tokio::test]
async fn unresolved_critical_audit_issue_disqualifies() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();

    store_metrics(&backend, "WBTC", now, &healthy_metrics()).await;

    let mut config = wrapped_btc_config(now);
    config.audit_data[0].critical_issues_unresolved = 1;

    let engine = ScoreEngine::new(backend.clone());
    let asset = registered("WBTC", config, now);
    let report = engine.score_asset(&asset, now).await.unwrap();

    assert!(!report.qualified);
    assert!(report.outcome.is_none());
    assert!(report.categories.is_empty());

    let failed = report
        .checks
        .iter()
        .find(|c| c.id == "no_critical_audit_issues")
        .unwrap();
    assert!(!failed.passed());
    assert!(failed.reason.contains("unresolved critical"));
}

#[tokio::test]
async fn critical_eoa_admin_caps_at_grade_d() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();

    store_metrics(&backend, "WBTC", now, &healthy_metrics()).await;

    let mut config = wrapped_btc_config(now);
    config.governance.as_mut().unwrap().roles = vec![GovernanceRole {
        role_name: "owner".to_string(),
        authority_kind: AuthorityKind::Eoa,
        role_weight: 5.0,
        address: Some("0xowner".to_string()),
        threshold: None,
        signer_count: None,
        dao_safeguards: None,
    }];

    let engine = ScoreEngine::new(backend.clone());
    let asset = registered("WBTC", config, now);
    let report = engine.score_asset(&asset, now).await.unwrap();

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.final_score, 54.0);
    assert_eq!(outcome.grade, Grade::D);
    assert!(outcome
        .breakers
        .iter()
        .any(|b| b.name == "Critical admin EOA"));
}

#[tokio::test]
async fn snapshot_cutoff_ignores_later_writes() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();

    store_metrics(&backend, "WBTC", now, &healthy_metrics()).await;

    let engine = ScoreEngine::new(backend.clone());
    let asset = registered("WBTC", wrapped_btc_config(now), now);
    let before = engine.score_asset(&asset, now).await.unwrap();

    // A depeg sampled after the cutoff must not change the evaluation.
    backend
        .append_metrics(vec![MetricSample::new(
            "WBTC",
            MetricName::PorRatio,
            0.5,
            now + Duration::minutes(5),
        )])
        .await
        .unwrap();

    let after = engine.score_asset(&asset, now).await.unwrap();
    assert_eq!(
        before.outcome.as_ref().unwrap().final_score,
        after.outcome.as_ref().unwrap().final_score
    );
    assert_eq!(
        before.outcome.unwrap().breakers.len(),
        after.outcome.unwrap().breakers.len()
    );
}

#[tokio::test]
async fn registry_round_trip_feeds_the_engine() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();
    let registry = AssetRegistry::new(backend.clone());

    registry
        .upsert("WBTC", "Wrapped Bitcoin", wrapped_btc_config(now), true)
        .await
        .unwrap();
    store_metrics(&backend, "WBTC", now, &healthy_metrics()).await;

    let asset = registry.get("WBTC").await.unwrap().unwrap();
    let engine = ScoreEngine::new(backend.clone());
    let report = engine.score_asset(&asset, now).await.unwrap();

    assert_eq!(report.outcome.unwrap().grade, Grade::A);
}
