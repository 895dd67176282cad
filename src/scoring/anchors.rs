//! Sub-score anchor tables and interpolation.
//!
//! Every quantitative sub-score maps its raw metric onto [0, 100] by linear
//! interpolation between anchor points, clamped at the end anchors. Peg
//! deviation is the one stepwise mapping. The tables encode the calibration
//! the scoring methodology was published with; changing an anchor changes
//! scores, so they live in one place.

use crate::asset::{BlacklistControl, CustodyModel};

#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    pub value: f64,
    pub score: f64,
}

const fn anchor(value: f64, score: f64) -> Anchor {
    Anchor { value, score }
}

/// Days since deployment.
pub const CODE_MATURITY_DAYS: [Anchor; 6] = [
    anchor(0.0, 10.0),
    anchor(30.0, 30.0),
    anchor(90.0, 50.0),
    anchor(180.0, 70.0),
    anchor(365.0, 85.0),
    anchor(730.0, 100.0),
];

/// Timelock delay in hours (only consulted when a timelock exists).
pub const TIMELOCK_HOURS: [Anchor; 5] = [
    anchor(0.0, 30.0),
    anchor(6.0, 50.0),
    anchor(24.0, 70.0),
    anchor(48.0, 85.0),
    anchor(168.0, 100.0),
];

/// Annualized volatility, percent.
pub const VOLATILITY_PCT: [Anchor; 5] = [
    anchor(20.0, 100.0),
    anchor(40.0, 80.0),
    anchor(60.0, 60.0),
    anchor(80.0, 40.0),
    anchor(100.0, 20.0),
];

/// Daily 95% VaR, percent.
pub const VAR95_PCT: [Anchor; 5] = [
    anchor(3.0, 100.0),
    anchor(5.0, 85.0),
    anchor(8.0, 65.0),
    anchor(12.0, 45.0),
    anchor(15.0, 25.0),
];

/// Slippage for a $100K trade, percent.
pub const SLIPPAGE_100K_PCT: [Anchor; 6] = [
    anchor(0.1, 100.0),
    anchor(0.3, 90.0),
    anchor(0.5, 80.0),
    anchor(1.0, 65.0),
    anchor(2.0, 45.0),
    anchor(5.0, 20.0),
];

/// Slippage for a $500K trade, percent.
pub const SLIPPAGE_500K_PCT: [Anchor; 5] = [
    anchor(0.5, 100.0),
    anchor(1.0, 85.0),
    anchor(2.0, 65.0),
    anchor(5.0, 40.0),
    anchor(10.0, 15.0),
];

/// LP concentration HHI, 0-10000.
pub const HHI: [Anchor; 6] = [
    anchor(1000.0, 100.0),
    anchor(1500.0, 85.0),
    anchor(2500.0, 65.0),
    anchor(4000.0, 45.0),
    anchor(6000.0, 25.0),
    anchor(10000.0, 5.0),
];

/// Cascade liquidation risk, percent of borrowed value below HF 1.1.
pub const CLR_PCT: [Anchor; 5] = [
    anchor(2.0, 100.0),
    anchor(5.0, 85.0),
    anchor(10.0, 65.0),
    anchor(20.0, 40.0),
    anchor(30.0, 20.0),
];

/// Recursive lending ratio, percent of supply in loops.
pub const RLR_PCT: [Anchor; 5] = [
    anchor(5.0, 100.0),
    anchor(10.0, 80.0),
    anchor(20.0, 60.0),
    anchor(35.0, 40.0),
    anchor(50.0, 20.0),
];

/// Lending pool utilization, percent.
pub const UTILIZATION_PCT: [Anchor; 5] = [
    anchor(50.0, 100.0),
    anchor(70.0, 85.0),
    anchor(85.0, 65.0),
    anchor(95.0, 40.0),
    anchor(100.0, 15.0),
];

/// Minutes since the last oracle update.
pub const ORACLE_FRESHNESS_MIN: [Anchor; 6] = [
    anchor(5.0, 100.0),
    anchor(30.0, 90.0),
    anchor(60.0, 75.0),
    anchor(180.0, 50.0),
    anchor(360.0, 25.0),
    anchor(720.0, 10.0),
];

/// Cross-chain oracle lag, minutes.
pub const CROSS_CHAIN_LAG_MIN: [Anchor; 5] = [
    anchor(5.0, 100.0),
    anchor(15.0, 85.0),
    anchor(30.0, 70.0),
    anchor(60.0, 50.0),
    anchor(120.0, 30.0),
];

/// Linear interpolation over an ascending anchor table; values outside the
/// end anchors clamp to the end scores.
pub fn interpolate(value: f64, anchors: &[Anchor]) -> f64 {
    debug_assert!(!anchors.is_empty());

    if value <= anchors[0].value {
        return anchors[0].score;
    }
    if let Some(last) = anchors.last() {
        if value >= last.value {
            return last.score;
        }
    }

    for pair in anchors.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        if value >= lower.value && value <= upper.value {
            let span = upper.value - lower.value;
            if span == 0.0 {
                return lower.score;
            }
            let ratio = (value - lower.value) / span;
            return lower.score + ratio * (upper.score - lower.score);
        }
    }

    anchors[0].score
}

/// Stepwise peg-deviation score over the absolute deviation percentage.
pub fn peg_deviation_score(deviation_pct: f64) -> f64 {
    let dev = deviation_pct.abs();
    if dev < 0.1 {
        100.0
    } else if dev < 0.5 {
        90.0
    } else if dev < 1.0 {
        75.0
    } else if dev < 2.0 {
        55.0
    } else if dev < 5.0 {
        30.0
    } else {
        10.0
    }
}

/// Proof-of-reserves score. A small bonus above full backing, a steep
/// penalty below it.
pub fn por_score(ratio: f64) -> f64 {
    if ratio >= 1.0 {
        95.0 + (5.0_f64).min((ratio - 1.0) * 100.0)
    } else {
        (95.0 - (1.0 - ratio) * 500.0).max(0.0)
    }
}

pub fn custody_score(model: CustodyModel) -> f64 {
    match model {
        CustodyModel::Decentralized => 100.0,
        CustodyModel::RegulatedInsured => 85.0,
        CustodyModel::Regulated => 70.0,
        CustodyModel::Unregulated => 45.0,
        CustodyModel::Unknown => 20.0,
    }
}

pub fn blacklist_score(has_blacklist: bool, control: BlacklistControl) -> f64 {
    if !has_blacklist {
        return 100.0;
    }
    match control {
        // A blacklist with no declared controller is treated as single-party.
        BlacklistControl::None | BlacklistControl::SingleEntity => 30.0,
        BlacklistControl::Governance => 75.0,
        BlacklistControl::Multisig => 55.0,
    }
}

/// Auditors whose engagement earns the audit-score bonus.
pub const TOP_TIER_AUDITORS: [&str; 5] = [
    "OpenZeppelin",
    "Trail of Bits",
    "Consensys Diligence",
    "Spearbit",
    "ChainSecurity",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_hits_anchor_points_exactly() {
        for a in CODE_MATURITY_DAYS {
            assert_eq!(interpolate(a.value, &CODE_MATURITY_DAYS), a.score);
        }
    }

    #[test]
    fn interpolation_is_linear_between_anchors() {
        // Halfway between (30, 30) and (90, 50).
        assert_eq!(interpolate(60.0, &CODE_MATURITY_DAYS), 40.0);
        // Halfway between (48, 85) and (168, 100).
        assert_eq!(interpolate(108.0, &TIMELOCK_HOURS), 92.5);
    }

    #[test]
    fn interpolation_clamps_outside_ends() {
        assert_eq!(interpolate(-5.0, &CODE_MATURITY_DAYS), 10.0);
        assert_eq!(interpolate(10_000.0, &CODE_MATURITY_DAYS), 100.0);
        assert_eq!(interpolate(200.0, &VOLATILITY_PCT), 20.0);
    }

    #[test]
    fn peg_steps_match_published_bands() {
        assert_eq!(peg_deviation_score(0.05), 100.0);
        assert_eq!(peg_deviation_score(-0.05), 100.0);
        assert_eq!(peg_deviation_score(0.3), 90.0);
        assert_eq!(peg_deviation_score(0.8), 75.0);
        assert_eq!(peg_deviation_score(1.5), 55.0);
        assert_eq!(peg_deviation_score(3.0), 30.0);
        assert_eq!(peg_deviation_score(7.0), 10.0);
    }

    #[test]
    fn por_rewards_buffer_and_punishes_shortfall() {
        assert_eq!(por_score(1.0), 95.0);
        assert!((por_score(1.001) - 95.1).abs() < 1e-9);
        assert_eq!(por_score(1.2), 100.0);
        assert_eq!(por_score(0.99), 90.0);
        assert_eq!(por_score(0.97), 80.0);
        assert_eq!(por_score(0.8), 0.0);
    }

    #[test]
    fn custody_and_blacklist_tables() {
        assert_eq!(custody_score(CustodyModel::Decentralized), 100.0);
        assert_eq!(custody_score(CustodyModel::Unknown), 20.0);
        assert_eq!(blacklist_score(false, BlacklistControl::SingleEntity), 100.0);
        assert_eq!(blacklist_score(true, BlacklistControl::Governance), 75.0);
        assert_eq!(blacklist_score(true, BlacklistControl::SingleEntity), 30.0);
    }
}
