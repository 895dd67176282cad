//! The six weighted scoring categories.
//!
//! Each category is a weighted sum of sub-scores in [0, 100]. A sub-score
//! whose input is missing is omitted and its weight redistributed
//! proportionally across the category's remaining sub-scores; the omission
//! stays visible in the trace. A category with no inputs at all is not
//! reported (its weight is redistributed one level up, by the engine).

use chrono::{DateTime, Utc};

use super::anchors::{
    self, blacklist_score, custody_score, interpolate, peg_deviation_score, por_score,
    TOP_TIER_AUDITORS,
};
use super::snapshot::MetricSnapshot;
use crate::asset::{AssetConfig, AuthorityKind, DaoSafeguards, Governance, GovernanceRole};
use crate::catalog::MetricName;

/// One sub-score within a category.
#[derive(Debug, Clone)]
pub struct SubScore {
    pub id: &'static str,
    /// Nominal weight within the category.
    pub weight: f64,
    /// Weight actually applied after redistribution; 0 when the input is
    /// missing.
    pub effective_weight: f64,
    pub score: Option<f64>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct CategoryScore {
    pub id: &'static str,
    pub name: &'static str,
    /// Nominal category weight in the overall score.
    pub weight: f64,
    pub score: f64,
    pub subs: Vec<SubScore>,
    /// Ids of sub-scores omitted for missing input.
    pub missing: Vec<&'static str>,
}

struct SubInput {
    id: &'static str,
    weight: f64,
    score: Option<f64>,
    detail: String,
}

fn sub(id: &'static str, weight: f64, score: Option<f64>, detail: impl Into<String>) -> SubInput {
    SubInput {
        id,
        weight,
        score,
        detail: detail.into(),
    }
}

/// Weighted sum over the present sub-scores, with proportional weight
/// redistribution. `None` when nothing is present.
fn finish(
    id: &'static str,
    name: &'static str,
    weight: f64,
    inputs: Vec<SubInput>,
) -> Option<CategoryScore> {
    let present_weight: f64 = inputs
        .iter()
        .filter(|s| s.score.is_some())
        .map(|s| s.weight)
        .sum();
    if present_weight <= 0.0 {
        return None;
    }

    let mut score = 0.0;
    let mut subs = Vec::with_capacity(inputs.len());
    let mut missing = Vec::new();

    for input in inputs {
        let effective_weight = match input.score {
            Some(value) => {
                let w = input.weight / present_weight;
                score += value * w;
                w
            }
            None => {
                missing.push(input.id);
                0.0
            }
        };
        subs.push(SubScore {
            id: input.id,
            weight: input.weight,
            effective_weight,
            score: input.score,
            detail: input.detail,
        });
    }

    Some(CategoryScore {
        id,
        name,
        weight,
        score,
        subs,
        missing,
    })
}

/// All categories with at least one scorable input.
pub fn score_categories(
    config: &AssetConfig,
    snapshot: &MetricSnapshot,
) -> Vec<CategoryScore> {
    [
        Some(smart_contract(config, snapshot.cutoff)),
        config.governance.as_ref().map(counterparty),
        market(snapshot),
        liquidity(snapshot),
        collateral(snapshot),
        reserve_oracle(snapshot),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// === Smart Contract (10%) ===

fn smart_contract(config: &AssetConfig, as_of: DateTime<Utc>) -> CategoryScore {
    let (audit_score, audit_detail) = audit_subscore(config, as_of);

    let days_deployed = config
        .deployment_date
        .map(|d| {
            as_of
                .date_naive()
                .signed_duration_since(d)
                .num_days()
                .max(0)
        })
        // Unknown deployment reads as brand new.
        .unwrap_or(0);
    let maturity = interpolate(days_deployed as f64, &anchors::CODE_MATURITY_DAYS);

    let mut incident_score: f64 = 100.0;
    for incident in &config.incidents {
        if incident.funds_lost_usd > 0.0 {
            incident_score -= 30.0 + incident.funds_lost_pct_of_tvl.min(30.0);
        } else {
            incident_score -= 15.0;
        }
    }
    incident_score = incident_score.max(0.0);

    finish(
        "smart_contract",
        "Smart Contract Risk",
        0.10,
        vec![
            sub("audit_score", 0.40, Some(audit_score), audit_detail),
            sub(
                "code_maturity",
                0.30,
                Some(maturity),
                format!("deployed {days_deployed} days ago"),
            ),
            sub(
                "incident_history",
                0.30,
                Some(incident_score),
                format!("{} incident(s) on record", config.incidents.len()),
            ),
        ],
    )
    .expect("smart contract sub-scores are always present")
}

fn audit_subscore(config: &AssetConfig, as_of: DateTime<Utc>) -> (f64, String) {
    if config.audit_data.is_empty() {
        return (20.0, "no audit on record".to_string());
    }

    let mut score: f64 = 80.0;
    let mut notes = Vec::new();

    let critical: u32 = config
        .audit_data
        .iter()
        .map(|a| a.critical_issues_unresolved)
        .sum();
    let high: u32 = config
        .audit_data
        .iter()
        .map(|a| a.high_issues_unresolved)
        .sum();

    if critical > 0 {
        score *= 0.3;
        notes.push(format!("{critical} unresolved critical issue(s)"));
    } else if high > 0 {
        score *= 0.7;
        notes.push(format!("{high} unresolved high issue(s)"));
    }

    if let Some(latest) = config.audit_data.iter().map(|a| a.date).max() {
        let months = as_of.date_naive().signed_duration_since(latest).num_days() as f64 / 30.0;
        if months > 24.0 {
            score *= 0.6;
            notes.push(format!("latest audit {months:.0} months old"));
        } else if months > 12.0 {
            score *= 0.8;
            notes.push(format!("latest audit {months:.0} months old"));
        }
    }

    let top_tier = config
        .audit_data
        .iter()
        .any(|a| TOP_TIER_AUDITORS.contains(&a.auditor.as_str()));
    if top_tier {
        score *= 1.1;
        notes.push("top-tier auditor".to_string());
    }

    let detail = if notes.is_empty() {
        format!("{} audit(s), no unresolved findings", config.audit_data.len())
    } else {
        notes.join("; ")
    };

    (score.clamp(0.0, 100.0), detail)
}

// === Counterparty (25%) ===

fn counterparty(governance: &Governance) -> CategoryScore {
    let (akc, akc_detail) = admin_key_control(governance);

    let custody = custody_score(governance.custody_model);

    let (timelock, timelock_detail) = if governance.has_timelock {
        (
            interpolate(governance.timelock_hours, &anchors::TIMELOCK_HOURS),
            format!("{}h timelock", governance.timelock_hours),
        )
    } else {
        (30.0, "no timelock, actions are immediate".to_string())
    };

    let blacklist = blacklist_score(governance.has_blacklist, governance.blacklist_control);

    finish(
        "counterparty",
        "Counterparty Risk",
        0.25,
        vec![
            sub("admin_key_control", 0.40, Some(akc), akc_detail),
            sub(
                "custody_model",
                0.30,
                Some(custody),
                format!("custody model: {:?}", governance.custody_model),
            ),
            sub("timelock_presence", 0.15, Some(timelock), timelock_detail),
            sub(
                "blacklist",
                0.15,
                Some(blacklist),
                if governance.has_blacklist {
                    format!("blacklist controlled by {:?}", governance.blacklist_control)
                } else {
                    "no blacklist function".to_string()
                },
            ),
        ],
    )
    .expect("counterparty sub-scores are always present")
}

fn admin_key_control(governance: &Governance) -> (f64, String) {
    let mut score: f64 = 100.0;
    let mut notes = Vec::new();

    for role in &governance.roles {
        let penalty = role.role_weight * role_penalty(role);
        if penalty > 0.0 {
            score -= penalty;
            notes.push(format!("{}: -{penalty:.1}", role.role_name));
        }
    }

    if !governance.has_timelock {
        score *= 0.85;
        notes.push("no timelock".to_string());
    }

    let detail = if notes.is_empty() {
        "no penalized roles".to_string()
    } else {
        notes.join("; ")
    };

    (score.clamp(0.0, 100.0), detail)
}

/// Per-unit-weight penalty for one governance role.
fn role_penalty(role: &GovernanceRole) -> f64 {
    match role.authority_kind {
        AuthorityKind::Eoa => 15.0,
        AuthorityKind::Multisig => {
            let threshold = role.threshold.unwrap_or(1) as f64;
            let signers = role.signer_count.unwrap_or(1).max(1) as f64;
            (1.0 - threshold / signers) * 10.0
        }
        AuthorityKind::DaoVoting => {
            let dao = dao_score(role.dao_safeguards.as_ref());
            (100.0 - dao) / 100.0 * 10.0
        }
        AuthorityKind::ContractUnknown => 7.0,
    }
}

/// DAO governance quality, capped below high-threshold multisig.
fn dao_score(safeguards: Option<&DaoSafeguards>) -> f64 {
    let mut score: f64 = 50.0;
    if let Some(s) = safeguards {
        if s.has_veto_power {
            score += 15.0;
        }
        if s.has_dual_governance {
            score += 10.0;
        }
        if s.quorum_pct >= 10.0 {
            score += 5.0;
        }
    }
    score.min(80.0)
}

// === Market (15%) ===

fn market(snapshot: &MetricSnapshot) -> Option<CategoryScore> {
    let peg = snapshot.value(MetricName::PegDeviationPct);
    let vol = snapshot.value(MetricName::VolatilityAnnualizedPct);
    let var = snapshot.value(MetricName::Var95Pct);

    finish(
        "market",
        "Market Risk",
        0.15,
        vec![
            sub(
                "peg_deviation",
                0.40,
                peg.map(peg_deviation_score),
                detail_or_missing(peg, "peg deviation", "%"),
            ),
            sub(
                "volatility",
                0.30,
                vol.map(|v| interpolate(v, &anchors::VOLATILITY_PCT)),
                detail_or_missing(vol, "annualized volatility", "%"),
            ),
            sub(
                "var95",
                0.30,
                var.map(|v| interpolate(v, &anchors::VAR95_PCT)),
                detail_or_missing(var, "daily VaR(95)", "%"),
            ),
        ],
    )
}

// === Liquidity (15%) ===

fn liquidity(snapshot: &MetricSnapshot) -> Option<CategoryScore> {
    let s100 = snapshot.value(MetricName::Slippage100kPct);
    let s500 = snapshot.value(MetricName::Slippage500kPct);
    let hhi = snapshot.value(MetricName::Hhi);

    finish(
        "liquidity",
        "Liquidity Risk",
        0.15,
        vec![
            sub(
                "slippage_100k",
                0.40,
                s100.map(|v| interpolate(v, &anchors::SLIPPAGE_100K_PCT)),
                detail_or_missing(s100, "$100K slippage", "%"),
            ),
            sub(
                "slippage_500k",
                0.30,
                s500.map(|v| interpolate(v, &anchors::SLIPPAGE_500K_PCT)),
                detail_or_missing(s500, "$500K slippage", "%"),
            ),
            sub(
                "hhi",
                0.30,
                hhi.map(|v| interpolate(v, &anchors::HHI)),
                detail_or_missing(hhi, "LP concentration HHI", ""),
            ),
        ],
    )
}

// === Collateral (10%) ===

fn collateral(snapshot: &MetricSnapshot) -> Option<CategoryScore> {
    let clr = snapshot.value(MetricName::ClrPct);
    let rlr = snapshot.value(MetricName::RlrPct);
    let util = snapshot.value(MetricName::UtilizationRate);

    finish(
        "collateral",
        "Collateral Risk",
        0.10,
        vec![
            sub(
                "cascade_liquidation",
                0.40,
                clr.map(|v| interpolate(v, &anchors::CLR_PCT)),
                detail_or_missing(clr, "cascade liquidation risk", "%"),
            ),
            sub(
                "recursive_lending",
                0.35,
                rlr.map(|v| interpolate(v, &anchors::RLR_PCT)),
                detail_or_missing(rlr, "recursive lending ratio", "%"),
            ),
            sub(
                "utilization",
                0.25,
                util.map(|v| interpolate(v, &anchors::UTILIZATION_PCT)),
                detail_or_missing(util, "utilization", "%"),
            ),
        ],
    )
}

// === Reserve & Oracle (25%) ===

fn reserve_oracle(snapshot: &MetricSnapshot) -> Option<CategoryScore> {
    let por = snapshot.value(MetricName::PorRatio);
    let freshness = snapshot.value(MetricName::OracleFreshnessMinutes);
    let lag = snapshot.value(MetricName::CrossChainOracleLagMinutes);

    finish(
        "reserve_oracle",
        "Reserve & Oracle Risk",
        0.25,
        vec![
            sub(
                "proof_of_reserves",
                0.50,
                por.map(por_score),
                detail_or_missing(por, "reserve ratio", ""),
            ),
            sub(
                "oracle_freshness",
                0.25,
                freshness.map(|v| interpolate(v, &anchors::ORACLE_FRESHNESS_MIN)),
                detail_or_missing(freshness, "oracle freshness", " min"),
            ),
            sub(
                "cross_chain_lag",
                0.25,
                lag.map(|v| interpolate(v, &anchors::CROSS_CHAIN_LAG_MIN)),
                detail_or_missing(lag, "cross-chain lag", " min"),
            ),
        ],
    )
}

fn detail_or_missing(value: Option<f64>, label: &str, unit: &str) -> String {
    match value {
        Some(v) => format!("{label}: {v:.4}{unit}"),
        None => format!("{label}: no sample"),
    }
}
