//! Cryptoeconomic security scorer (spec §4.10).
//!
//! The only module in this crate that uses floating point: it's a
//! read-only diagnostic over already-committed state, never a consensus
//! input, so the determinism requirement that forces fixed-point
//! arithmetic everywhere else doesn't apply here.

use crate::types::VotingPower;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecurityScore {
    pub nash_indicator: f64,
    pub collusion_resistance: f64,
    pub security_margin_score: f64,
    pub composite: f64,
}

/// Herfindahl-Hirschman Index over voting-power shares, in `[0, 1]`. Higher
/// HHI means power is more concentrated.
fn herfindahl_index(powers: &[VotingPower]) -> f64 {
    let total: u128 = powers.iter().sum();
    if total == 0 {
        return 1.0;
    }
    powers
        .iter()
        .map(|p| {
            let share = *p as f64 / total as f64;
            share * share
        })
        .sum()
}

/// Shannon entropy of the voting-power distribution, normalized by the
/// maximum entropy for `n` validators (`ln n`), giving `1.0` for a perfectly
/// even split and `0.0` for total concentration. Used as the "Nash
/// indicator": how far the set is from a single validator being pivotal.
fn normalized_entropy(powers: &[VotingPower]) -> f64 {
    let total: u128 = powers.iter().sum();
    if total == 0 || powers.len() < 2 {
        return 0.0;
    }
    let entropy: f64 = powers
        .iter()
        .filter(|p| **p > 0)
        .map(|p| {
            let share = *p as f64 / total as f64;
            -share * share.ln()
        })
        .sum();
    let max_entropy = (powers.len() as f64).ln();
    if max_entropy == 0.0 {
        0.0
    } else {
        entropy / max_entropy
    }
}

/// Rescales HHI against the `n`-validator baseline so an evenly-split set
/// always scores 1.0 regardless of `n` (spec §4.10: `1 - (HHI - 1/n)/(1 -
/// 1/n)`). `n < 2` has no well-defined baseline to rescale against; a lone
/// validator has no collusion resistance at all.
fn collusion_resistance_from_hhi(hhi: f64, n: usize) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let floor = 1.0 / n as f64;
    (1.0 - (hhi - floor) / (1.0 - floor)).clamp(0.0, 1.0)
}

/// Logistic squashing into `(0, 1)`, used to turn an unbounded margin
/// (validator count above the Byzantine-safe minimum) into a score.
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Computes the composite security score for one asset's current validator
/// set (spec §4.10): `0.4 * nash + 0.3 * collusion_resistance + 0.3 *
/// sigmoid(security_margin - 10)`.
///
/// `num_validators` is the count of validators whose submission survived
/// the most recent aggregation; `byzantine_safe_minimum` is `floor(n/3) + 1`
/// over the full bonded set, i.e. the number of validators that would need
/// to collude to break safety.
pub fn compute_security_score(
    powers: &[VotingPower],
    num_validators: u32,
    byzantine_safe_minimum: u32,
) -> SecurityScore {
    let nash_indicator = normalized_entropy(powers);
    let collusion_resistance = collusion_resistance_from_hhi(herfindahl_index(powers), powers.len());
    let security_margin = num_validators as f64 - byzantine_safe_minimum as f64;
    let security_margin_score = sigmoid(security_margin - 10.0);

    let composite =
        0.4 * nash_indicator.clamp(0.0, 1.0) + 0.3 * collusion_resistance.clamp(0.0, 1.0) + 0.3 * security_margin_score;

    SecurityScore {
        nash_indicator: nash_indicator.clamp(0.0, 1.0),
        collusion_resistance: collusion_resistance.clamp(0.0, 1.0),
        security_margin_score,
        composite: composite.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_power_distribution_maximizes_collusion_resistance() {
        let powers = vec![100u128; 10];
        let score = compute_security_score(&powers, 10, 4);
        assert!(score.collusion_resistance > 0.85);
    }

    #[test]
    fn equal_power_resistance_is_one_regardless_of_validator_count() {
        // The spec's rescaled formula cancels HHI == 1/n exactly, so an
        // evenly-split set always scores 1.0, not `1 - 1/n`.
        for n in [2usize, 4, 10, 25] {
            let powers = vec![100u128; n];
            let score = compute_security_score(&powers, n as u32, 1);
            assert_eq!(score.collusion_resistance, 1.0, "n={n}");
        }
    }

    #[test]
    fn single_validator_has_no_collusion_resistance() {
        let score = compute_security_score(&[1_000u128], 1, 1);
        assert_eq!(score.collusion_resistance, 0.0);
    }

    #[test]
    fn concentrated_power_lowers_collusion_resistance() {
        let concentrated = vec![9700u128, 100, 100, 100];
        let equal = vec![2500u128; 4];
        let concentrated_score = compute_security_score(&concentrated, 4, 2);
        let equal_score = compute_security_score(&equal, 4, 2);
        assert!(concentrated_score.collusion_resistance < equal_score.collusion_resistance);
    }

    #[test]
    fn composite_is_bounded() {
        let powers = vec![1u128, 1_000_000_000];
        let score = compute_security_score(&powers, 2, 1);
        assert!(score.composite >= 0.0 && score.composite <= 1.0);
    }

    #[test]
    fn more_validators_above_safe_minimum_raises_margin_score() {
        let powers = vec![100u128; 20];
        let low_margin = compute_security_score(&powers, 5, 4);
        let high_margin = compute_security_score(&powers, 20, 4);
        assert!(high_margin.security_margin_score > low_margin.security_margin_score);
    }
}
