//! Circuit breakers and the grade mapping.
//!
//! Breakers cap or shrink the weighted score when a single condition is
//! bad enough that no amount of strength elsewhere should compensate.
//! Caps and the multiplier combine as `min(caps, multiplier * score)`.

use std::fmt;

use super::categories::CategoryScore;
use super::checks::PrimaryChecks;
use super::snapshot::MetricSnapshot;
use crate::asset::{AssetConfig, AuthorityKind};
use crate::catalog::MetricName;

/// Role weight at or above which an EOA admin is a critical exposure.
const CRITICAL_ROLE_WEIGHT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        write!(f, "{letter}")
    }
}

/// A [85, 100], B [70, 85), C [55, 70), D [40, 55), F [0, 40).
pub fn grade_for(score: f64) -> Grade {
    if score >= 85.0 {
        Grade::A
    } else if score >= 70.0 {
        Grade::B
    } else if score >= 55.0 {
        Grade::C
    } else if score >= 40.0 {
        Grade::D
    } else {
        Grade::F
    }
}

#[derive(Debug, Clone)]
pub struct BreakerHit {
    pub name: &'static str,
    pub effect: String,
}

#[derive(Debug, Clone)]
pub struct GradeOutcome {
    /// Weighted category sum before breakers.
    pub raw_score: f64,
    pub final_score: f64,
    pub grade: Grade,
    pub breakers: Vec<BreakerHit>,
}

/// Apply the breaker table to a raw weighted score.
pub fn apply_breakers(
    raw_score: f64,
    categories: &[CategoryScore],
    config: &AssetConfig,
    snapshot: &MetricSnapshot,
    checks: &PrimaryChecks,
) -> GradeOutcome {
    let mut caps: Vec<f64> = Vec::new();
    let mut breakers = Vec::new();

    if let Some(por) = snapshot.value(MetricName::PorRatio) {
        if por < 1.0 {
            caps.push(69.0);
            breakers.push(BreakerHit {
                name: "Reserve undercollateralized",
                effect: format!("por_ratio {por:.4} < 1.0, score capped at 69 (grade <= C)"),
            });
        }
    }

    let critical_eoa = config
        .governance
        .as_ref()
        .map(|g| {
            g.roles.iter().any(|r| {
                r.authority_kind == AuthorityKind::Eoa && r.role_weight >= CRITICAL_ROLE_WEIGHT
            })
        })
        .unwrap_or(false);
    if critical_eoa {
        caps.push(54.0);
        breakers.push(BreakerHit {
            name: "Critical admin EOA",
            effect: "critical role held by a single key, score capped at 54 (grade <= D)"
                .to_string(),
        });
    }

    if checks
        .check("no_active_security_incident")
        .map(|c| !c.passed())
        .unwrap_or(false)
    {
        caps.push(39.0);
        breakers.push(BreakerHit {
            name: "Active security incident",
            effect: "recent fund-loss incident, score capped at 39 (grade <= F)".to_string(),
        });
    }

    let mut multiplier: f64 = 1.0;
    for category in categories {
        if category.score < 25.0 {
            multiplier = multiplier.min(0.5);
            breakers.push(BreakerHit {
                name: "Category below 25",
                effect: format!("{} scored {:.1}, multiplier 0.5", category.name, category.score),
            });
        } else if category.score < 40.0 {
            multiplier = multiplier.min(0.7);
            breakers.push(BreakerHit {
                name: "Category below 40",
                effect: format!("{} scored {:.1}, multiplier 0.7", category.name, category.score),
            });
        }
    }

    if checks
        .check("has_security_audit")
        .map(|c| !c.passed())
        .unwrap_or(false)
    {
        caps.push(54.0);
        breakers.push(BreakerHit {
            name: "No audit ever",
            effect: "never audited, score capped at 54".to_string(),
        });
    }

    let multiplied = raw_score * multiplier;
    let final_score = caps
        .iter()
        .fold(multiplied, |score, cap| score.min(*cap))
        .clamp(0.0, 100.0);

    GradeOutcome {
        raw_score,
        final_score,
        grade: grade_for(final_score),
        breakers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::checks::run_primary_checks;
    use chrono::Utc;
    use std::collections::HashMap;

    fn snapshot_with(values: &[(MetricName, f64)]) -> MetricSnapshot {
        MetricSnapshot::from_values(
            "TEST",
            Utc::now(),
            values.iter().copied().collect::<HashMap<_, _>>(),
        )
    }

    fn category(id: &'static str, score: f64) -> CategoryScore {
        CategoryScore {
            id,
            name: id,
            weight: 0.25,
            score,
            subs: vec![],
            missing: vec![],
        }
    }

    #[test]
    fn grade_mapping_partitions_the_range() {
        assert_eq!(grade_for(100.0), Grade::A);
        assert_eq!(grade_for(85.0), Grade::A);
        assert_eq!(grade_for(84.9), Grade::B);
        assert_eq!(grade_for(70.0), Grade::B);
        assert_eq!(grade_for(69.9), Grade::C);
        assert_eq!(grade_for(55.0), Grade::C);
        assert_eq!(grade_for(54.9), Grade::D);
        assert_eq!(grade_for(40.0), Grade::D);
        assert_eq!(grade_for(39.9), Grade::F);
        assert_eq!(grade_for(0.0), Grade::F);
    }

    #[test]
    fn undercollateralized_reserve_caps_at_sixty_nine() {
        let config = AssetConfig::default();
        let checks = run_primary_checks(&config, Utc::now());
        let snapshot = snapshot_with(&[(MetricName::PorRatio, 0.97)]);

        let outcome = apply_breakers(92.0, &[], &config, &snapshot, &checks);
        assert_eq!(outcome.final_score, 69.0);
        assert_eq!(outcome.grade, Grade::C);
        assert!(outcome
            .breakers
            .iter()
            .any(|b| b.name == "Reserve undercollateralized"));
    }

    #[test]
    fn weak_category_halves_the_score() {
        let config = AssetConfig::default();
        let checks = run_primary_checks(&config, Utc::now());
        let snapshot = snapshot_with(&[(MetricName::PorRatio, 1.01)]);
        let categories = vec![category("market", 20.0), category("liquidity", 90.0)];

        // No-audit cap also fires for the empty config; the multiplier is
        // applied before the min with the caps.
        let outcome = apply_breakers(80.0, &categories, &config, &snapshot, &checks);
        assert_eq!(outcome.final_score, 40.0);
        assert!(outcome.breakers.iter().any(|b| b.name == "Category below 25"));
    }

    #[test]
    fn multiplier_takes_the_worst_category_only() {
        let config = AssetConfig::default();
        let checks = run_primary_checks(&config, Utc::now());
        let snapshot = snapshot_with(&[]);
        let categories = vec![category("market", 20.0), category("collateral", 35.0)];

        let outcome = apply_breakers(100.0, &categories, &config, &snapshot, &checks);
        // min(0.5, 0.7) applies once, then the no-audit cap of 54.
        assert_eq!(outcome.final_score, 50.0);
    }

    #[test]
    fn healthy_inputs_trigger_nothing() {
        let config = AssetConfig {
            audit_data: vec![crate::asset::Audit {
                auditor: "Spearbit".to_string(),
                date: Utc::now().date_naive() - chrono::Duration::days(90),
                critical_issues_unresolved: 0,
                high_issues_unresolved: 0,
            }],
            ..AssetConfig::default()
        };
        let checks = run_primary_checks(&config, Utc::now());
        let snapshot = snapshot_with(&[(MetricName::PorRatio, 1.001)]);
        let categories = vec![category("market", 95.0)];

        let outcome = apply_breakers(95.0, &categories, &config, &snapshot, &checks);
        assert!(outcome.breakers.is_empty());
        assert_eq!(outcome.final_score, 95.0);
        assert_eq!(outcome.grade, Grade::A);
    }
}
