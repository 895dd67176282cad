//! Primary checks: three binary gates that must all pass before an asset
//! is scored at all. A failing gate cannot be compensated by strong
//! category scores.

use chrono::{DateTime, Utc};

use crate::asset::{AssetConfig, Incident};

pub const ACTIVE_INCIDENT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub id: &'static str,
    pub name: &'static str,
    pub status: CheckStatus,
    pub reason: String,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

#[derive(Debug, Clone)]
pub struct PrimaryChecks {
    pub qualified: bool,
    pub checks: Vec<CheckResult>,
}

impl PrimaryChecks {
    pub fn check(&self, id: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.id == id)
    }

    pub fn failed_ids(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.id)
            .collect()
    }
}

/// Run the three gates in order. `as_of` is the snapshot cutoff, so the
/// same snapshot always produces the same verdict.
pub fn run_primary_checks(config: &AssetConfig, as_of: DateTime<Utc>) -> PrimaryChecks {
    let checks = vec![
        has_security_audit(config),
        no_critical_audit_issues(config),
        no_active_security_incident(config, as_of),
    ];

    PrimaryChecks {
        qualified: checks.iter().all(CheckResult::passed),
        checks,
    }
}

fn has_security_audit(config: &AssetConfig) -> CheckResult {
    if config.audit_data.is_empty() {
        CheckResult {
            id: "has_security_audit",
            name: "Has Security Audit",
            status: CheckStatus::Fail,
            reason: "no security audit on record".to_string(),
        }
    } else {
        let auditors: Vec<&str> = config
            .audit_data
            .iter()
            .map(|a| a.auditor.as_str())
            .collect();
        CheckResult {
            id: "has_security_audit",
            name: "Has Security Audit",
            status: CheckStatus::Pass,
            reason: format!("{} audit(s): {}", auditors.len(), auditors.join(", ")),
        }
    }
}

fn no_critical_audit_issues(config: &AssetConfig) -> CheckResult {
    let critical: u32 = config
        .audit_data
        .iter()
        .map(|a| a.critical_issues_unresolved)
        .sum();

    if critical > 0 {
        CheckResult {
            id: "no_critical_audit_issues",
            name: "No Critical Audit Issues",
            status: CheckStatus::Fail,
            reason: format!("{critical} unresolved critical issue(s) across audits"),
        }
    } else {
        CheckResult {
            id: "no_critical_audit_issues",
            name: "No Critical Audit Issues",
            status: CheckStatus::Pass,
            reason: "no unresolved critical issues".to_string(),
        }
    }
}

/// An incident is active when funds were lost, it happened within the last
/// 30 days, and it is unresolved or was resolved within that window too.
pub fn is_active_incident(incident: &Incident, as_of: DateTime<Utc>) -> bool {
    if incident.funds_lost_usd <= 0.0 {
        return false;
    }

    let today = as_of.date_naive();
    let within_window = |date: chrono::NaiveDate| {
        let age = today.signed_duration_since(date).num_days();
        (0..ACTIVE_INCIDENT_WINDOW_DAYS).contains(&age)
    };

    if !within_window(incident.date) {
        return false;
    }

    match incident.resolved_at {
        None => true,
        Some(resolved) => within_window(resolved),
    }
}

fn no_active_security_incident(config: &AssetConfig, as_of: DateTime<Utc>) -> CheckResult {
    let active: Vec<&Incident> = config
        .incidents
        .iter()
        .filter(|i| is_active_incident(i, as_of))
        .collect();

    if active.is_empty() {
        CheckResult {
            id: "no_active_security_incident",
            name: "No Active Security Incident",
            status: CheckStatus::Pass,
            reason: "no recent incident with fund loss".to_string(),
        }
    } else {
        CheckResult {
            id: "no_active_security_incident",
            name: "No Active Security Incident",
            status: CheckStatus::Fail,
            reason: format!(
                "{} incident(s) with fund loss in the last {ACTIVE_INCIDENT_WINDOW_DAYS} days",
                active.len()
            ),
        }
    }
}
