//! The aggregation pipeline (spec §4.3): voting-power join, outlier
//! filtering via MAD/IQR/modified-Z/Grubbs, and voting-power-weighted
//! median. Every step is total-ordered by `ValidatorAddr` bytes so that
//! feeding the same multiset in any order yields an identical result
//! (spec §8, property 3).
//!
//! All arithmetic here is exact fixed-point (`Decimal`); no floating point
//! appears anywhere in this module, including the Grubbs critical-value
//! lookup and the fixed-point square root used for the sample standard
//! deviation.

use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::types::{Asset, ValidatorAddr, VotingPower};

/// A single validator's submission with its voting power already attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub validator: ValidatorAddr,
    pub price: Decimal,
    pub voting_power: VotingPower,
    /// The submitting validator's registered geographic region, used by the
    /// `MinGeographicRegions` gate. Carries `"unknown"` for a validator the
    /// resolver couldn't place.
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    None,
    Low,
    Moderate,
    High,
    Extreme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationOutcome {
    pub price: Decimal,
    pub num_validators: u32,
    pub surviving_validators: Vec<ValidatorAddr>,
}

/// Sorts submissions deterministically: by price ascending, ties broken by
/// validator address bytes (spec §4.3 "tie-break by ValidatorAddr bytes").
fn sort_by_price(mut subs: Vec<Submission>) -> Vec<Submission> {
    subs.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.validator.cmp(&b.validator)));
    subs
}

/// Lower-median per spec §4.3: the value at index `floor(n/2)` of the
/// ascending-sorted sequence. Shared with `crosschain`'s own median step.
pub(crate) fn lower_median(sorted: &[Decimal]) -> Decimal {
    sorted[sorted.len() / 2]
}

fn mad(sorted_prices: &[Decimal], median: Decimal) -> Decimal {
    let mut deviations: Vec<Decimal> =
        sorted_prices.iter().map(|p| p.checked_sub(median).unwrap().abs()).collect();
    deviations.sort();
    lower_median(&deviations)
}

/// Q1/Q3 via linear interpolation on the sorted sequence, per spec §4.3:
/// Q1 at index `(n-1)/4`, Q3 at index `3(n-1)/4`.
fn quartiles(sorted: &[Decimal]) -> (Decimal, Decimal) {
    let n = sorted.len();
    let q1 = interpolate_at(sorted, (n as u128 - 1) * 1, 4);
    let q3 = interpolate_at(sorted, (n as u128 - 1) * 3, 4);
    (q1, q3)
}

/// Interpolates the value at fractional index `num/den` into `sorted`.
fn interpolate_at(sorted: &[Decimal], num: u128, den: u128) -> Decimal {
    let idx_floor = (num / den) as usize;
    let idx_ceil = ((num + den - 1) / den) as usize;
    let idx_floor = idx_floor.min(sorted.len() - 1);
    let idx_ceil = idx_ceil.min(sorted.len() - 1);
    if idx_floor == idx_ceil {
        return sorted[idx_floor];
    }
    let frac_num = num - idx_floor as u128 * den;
    Decimal::lerp(sorted[idx_floor], sorted[idx_ceil], frac_num, den).unwrap()
}

/// Relative dispersion used to scale the severity thresholds (spec §4.3
/// "volatility-adjusted threshold"); IQR isn't itself floating point, so this
/// stays exact fixed-point. Clamped to `[0, 1]` so a single wild submission
/// can't blow thresholds open arbitrarily far.
fn volatility(median: Decimal, iqr: Decimal) -> Decimal {
    if median.is_zero() {
        return Decimal::ZERO;
    }
    let v = iqr.abs().checked_div(median.abs()).unwrap_or(Decimal::ZERO);
    if v > Decimal::ONE {
        Decimal::ONE
    } else {
        v
    }
}

/// Fixed-point Babylonian square root: deterministic, no floating point.
/// Converges in a fixed number of iterations for the value ranges this
/// module sees (fixed-point prices and variances).
fn decimal_sqrt(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_negative() {
        return Decimal::ZERO;
    }
    let mut x = if value > Decimal::ONE { value } else { Decimal::ONE };
    for _ in 0..64 {
        let next = Decimal::midpoint(x, value.checked_div(x).unwrap_or(Decimal::ZERO));
        if next == x {
            break;
        }
        x = next;
    }
    x
}

fn mean(prices: &[Decimal]) -> Decimal {
    let mut sum = Decimal::ZERO;
    for p in prices {
        sum = sum.checked_add(*p).unwrap();
    }
    sum.checked_mul_ratio(1, prices.len() as u128).unwrap()
}

fn sample_stddev(prices: &[Decimal], mean: Decimal) -> Decimal {
    if prices.len() < 2 {
        return Decimal::ZERO;
    }
    let mut sum_sq = Decimal::ZERO;
    for p in prices {
        let d = p.checked_sub(mean).unwrap();
        sum_sq = sum_sq.checked_add(d.checked_mul(d).unwrap()).unwrap();
    }
    let variance = sum_sq.checked_mul_ratio(1, (prices.len() - 1) as u128).unwrap();
    decimal_sqrt(variance)
}

/// Two-sided Grubbs critical values at alpha=0.05 for sample sizes 3..=30,
/// expressed in basis points (1/10_000) so they load as exact `Decimal`s.
/// Values beyond this table skip the Grubbs check (documented in
/// `DESIGN.md`); n below 3 always skips it (test is undefined for n<3).
const GRUBBS_CRITICAL_BP: &[(usize, i128)] = &[
    (3, 11_5500), (4, 14_8100), (5, 17_1500), (6, 18_8700), (7, 20_2000),
    (8, 21_2600), (9, 22_1500), (10, 22_9000), (11, 23_5500), (12, 24_1200),
    (13, 24_6300), (14, 25_0800), (15, 25_4900), (16, 25_8700), (17, 26_2100),
    (18, 26_5300), (19, 26_8300), (20, 27_1000), (21, 27_3600), (22, 27_6100),
    (23, 27_8400), (24, 28_0500), (25, 28_2600), (26, 28_4600), (27, 28_6400),
    (28, 28_8200), (29, 28_9900), (30, 29_1500),
];

fn grubbs_critical(n: usize) -> Option<Decimal> {
    GRUBBS_CRITICAL_BP
        .iter()
        .find(|(size, _)| *size == n)
        .map(|(_, bp)| Decimal::from_scaled(*bp, 4).unwrap())
}

/// Runs the Grubbs test and, if the most extreme point exceeds the critical
/// value for this sample size, returns its index into `prices`.
fn grubbs_outlier_index(prices: &[Decimal]) -> Option<usize> {
    let n = prices.len();
    let critical = grubbs_critical(n)?;
    let m = mean(prices);
    let s = sample_stddev(prices, m);
    if s.is_zero() {
        return None;
    }
    let mut worst_idx = 0;
    let mut worst_g = Decimal::ZERO;
    for (i, p) in prices.iter().enumerate() {
        let g = p.checked_sub(m).unwrap().abs().checked_div(s).unwrap();
        if g > worst_g {
            worst_g = g;
            worst_idx = i;
        }
    }
    (worst_g > critical).then_some(worst_idx)
}

/// Classifies the severity of one submission's deviation from the median
/// (spec §4.3): modified Z-score against thresholds `{2, 3.5, 5, 8}` scaled
/// by `(1 + volatility)`, upgraded to at least `High` if the price also
/// falls outside the volatility-scaled IQR fence.
fn classify(price: Decimal, median: Decimal, mad: Decimal, q1: Decimal, q3: Decimal, vol: Decimal) -> Severity {
    let scale = Decimal::ONE.checked_add(vol).unwrap();
    let modified_z = if mad.is_zero() {
        Decimal::ZERO
    } else {
        let k = Decimal::from_scaled(6745, 4).unwrap(); // 0.6745
        k.checked_mul(price.checked_sub(median).unwrap()).unwrap().checked_div(mad).unwrap().abs()
    };

    let mut severity = severity_from_z(modified_z, scale);

    let iqr = q3.checked_sub(q1).unwrap();
    let fence = Decimal::from_scaled(15, 1).unwrap().checked_mul(iqr).unwrap().checked_mul(scale).unwrap();
    let lower_fence = q1.checked_sub(fence).unwrap();
    let upper_fence = q3.checked_add(fence).unwrap();
    if (price < lower_fence || price > upper_fence) && severity < Severity::High {
        severity = Severity::High;
    }
    severity
}

fn severity_from_z(z: Decimal, scale: Decimal) -> Severity {
    let t = |base_tenths: i128| Decimal::from_scaled(base_tenths, 1).unwrap().checked_mul(scale).unwrap();
    if z < t(20) {
        Severity::None
    } else if z < t(35) {
        Severity::Low
    } else if z < t(50) {
        Severity::Moderate
    } else if z < t(80) {
        Severity::High
    } else {
        Severity::Extreme
    }
}

/// Filters outliers out of `subs`, returning the surviving submissions.
/// `MAD == 0 && IQR == 0` (all-equal prices) skips filtering entirely, per
/// spec §4.3 edge case.
fn filter_outliers(subs: Vec<Submission>) -> Vec<Submission> {
    let sorted = sort_by_price(subs);
    let prices: Vec<Decimal> = sorted.iter().map(|s| s.price).collect();
    if prices.len() < 3 {
        return sorted;
    }
    let median = lower_median(&prices);
    let mad_value = mad(&prices, median);
    let (q1, q3) = quartiles(&prices);
    let iqr = q3.checked_sub(q1).unwrap();
    if mad_value.is_zero() && iqr.is_zero() {
        return sorted;
    }
    let vol = volatility(median, iqr);

    let mut drop = vec![false; sorted.len()];
    for (i, p) in prices.iter().enumerate() {
        let severity = classify(*p, median, mad_value, q1, q3, vol);
        if severity >= Severity::High {
            drop[i] = true;
        }
    }
    if let Some(idx) = grubbs_outlier_index(&prices) {
        drop[idx] = true;
    }

    sorted.into_iter().zip(drop).filter(|(_, d)| !d).map(|(s, _)| s).collect()
}

/// Voting-power-weighted median (spec §4.3 step 4): the price at the first
/// index, in ascending price order, where cumulative voting power reaches
/// half of the total.
fn weighted_median(subs: &[Submission]) -> Decimal {
    let total: u128 = subs.iter().map(|s| s.voting_power).sum();
    let mut cumulative: u128 = 0;
    for s in subs {
        cumulative += s.voting_power;
        if 2 * cumulative >= total {
            return s.price;
        }
    }
    subs.last().expect("non-empty by construction").price
}

/// Runs the full pipeline for one asset. `joined` must already have had
/// unbonded validators dropped and voting power attached (spec §4.3 step 1).
///
/// `require_geographic_diversity`/`min_geographic_regions` gate on the
/// count of distinct `Submission::region` values in the raw, pre-filter
/// joined set (spec §7 `InsufficientDiversity`); disabled by default via
/// `Params::require_geographic_diversity`.
pub fn aggregate(
    asset: &Asset,
    joined: Vec<Submission>,
    total_bonded_power: VotingPower,
    min_voting_power_for_consensus: Decimal,
    vote_threshold: Decimal,
    require_geographic_diversity: bool,
    min_geographic_regions: u32,
) -> OracleResult<AggregationOutcome> {
    if joined.is_empty() {
        return Err(OracleError::NoSubmissions(asset.clone()));
    }

    if require_geographic_diversity {
        let regions: std::collections::BTreeSet<&str> = joined.iter().map(|s| s.region.as_str()).collect();
        if (regions.len() as u32) < min_geographic_regions {
            return Err(OracleError::InsufficientDiversity {
                found: regions.len() as u32,
                required: min_geographic_regions,
            });
        }
    }

    let joined = sort_by_price(joined);
    let original_power: u128 = joined.iter().map(|s| s.voting_power).sum();
    let required_power = Decimal::from_i128(total_bonded_power as i128)
        .checked_mul(min_voting_power_for_consensus)?;
    if Decimal::from_i128(original_power as i128) < required_power {
        return Err(OracleError::InsufficientVotingPower {
            asset: asset.clone(),
            power: original_power.to_string(),
            required: required_power.to_string(),
        });
    }

    let survivors = filter_outliers(joined);
    if survivors.is_empty() {
        return Err(OracleError::InsufficientConsensus {
            asset: asset.clone(),
            power: "0".to_string(),
            required: (Decimal::from_i128(original_power as i128).checked_mul(vote_threshold)?)
                .to_string(),
        });
    }

    let remaining_power: u128 = survivors.iter().map(|s| s.voting_power).sum();
    let required_consensus = Decimal::from_i128(original_power as i128).checked_mul(vote_threshold)?;
    if Decimal::from_i128(remaining_power as i128) < required_consensus {
        return Err(OracleError::InsufficientConsensus {
            asset: asset.clone(),
            power: remaining_power.to_string(),
            required: required_consensus.to_string(),
        });
    }

    let sorted_survivors = sort_by_price(survivors);
    let price = weighted_median(&sorted_survivors);
    let surviving_validators = sorted_survivors.iter().map(|s| s.validator.clone()).collect();

    Ok(AggregationOutcome { price, num_validators: sorted_survivors.len() as u32, surviving_validators })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(validator: &str, price: &str, power: u128) -> Submission {
        Submission {
            validator: ValidatorAddr(validator.to_string()),
            price: parse_decimal(price),
            voting_power: power,
            region: "us".to_string(),
        }
    }

    fn parse_decimal(s: &str) -> Decimal {
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, "0"));
        let int_part: i128 = int_part.parse().unwrap();
        let scale = 10i128.pow(frac_part.len() as u32);
        let frac: i128 = frac_part.parse().unwrap();
        let total = int_part * scale + frac;
        Decimal::from_scaled(total, frac_part.len() as u32).unwrap()
    }

    #[test]
    fn s1_three_validator_happy_path() {
        let subs = vec![
            sub("val-a", "10.00", 1_000_000),
            sub("val-b", "10.05", 1_000_000),
            sub("val-c", "9.95", 1_000_000),
        ];
        let out = aggregate(
            &"ATOM/USD".to_string(),
            subs,
            3_000_000,
            Decimal::from_scaled(50, 2).unwrap(),
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        )
        .unwrap();
        assert_eq!(out.price, parse_decimal("10.00"));
        assert_eq!(out.num_validators, 3);
    }

    #[test]
    fn s2_byzantine_minority_is_filtered() {
        let mut subs = Vec::new();
        for i in 0..7 {
            subs.push(sub(&format!("honest-{i}"), "50000", 1_000_000));
        }
        subs.push(sub("byz-1", "25000", 1_000_000));
        subs.push(sub("byz-2", "100000", 1_000_000));
        subs.push(sub("byz-3", "150000", 1_000_000));

        let out = aggregate(
            &"BTC/USD".to_string(),
            subs,
            10_000_000,
            Decimal::from_scaled(50, 2).unwrap(),
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        )
        .unwrap();
        assert_eq!(out.price, Decimal::from_i128(50_000));
        assert_eq!(out.num_validators, 7);
    }

    #[test]
    fn s3_insufficient_consensus_after_filter() {
        let mut subs = Vec::new();
        for i in 0..3 {
            subs.push(sub(&format!("honest-{i}"), "50000", 1_000_000));
        }
        for i in 0..4 {
            subs.push(sub(&format!("byz-{i}"), "150000", 1_000_000));
        }
        let out = aggregate(
            &"BTC/USD".to_string(),
            subs,
            7_000_000,
            Decimal::from_scaled(50, 2).unwrap(),
            Decimal::from_scaled(67, 2).unwrap(),
            false,
            0,
        );
        assert!(matches!(out, Err(OracleError::InsufficientConsensus { .. })));
    }

    #[test]
    fn single_submission_succeeds_when_gates_pass() {
        let subs = vec![sub("val-a", "10.00", 1_000_000)];
        let out = aggregate(
            &"ATOM/USD".to_string(),
            subs,
            1_000_000,
            Decimal::from_scaled(50, 2).unwrap(),
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        )
        .unwrap();
        assert_eq!(out.num_validators, 1);
    }

    #[test]
    fn all_equal_prices_skip_outlier_drop() {
        let subs = vec![
            sub("val-a", "10.00", 1_000_000),
            sub("val-b", "10.00", 1_000_000),
            sub("val-c", "10.00", 1_000_000),
        ];
        let out = aggregate(
            &"ATOM/USD".to_string(),
            subs,
            3_000_000,
            Decimal::from_scaled(50, 2).unwrap(),
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        )
        .unwrap();
        assert_eq!(out.num_validators, 3);
        assert_eq!(out.price, Decimal::from_i128(10));
    }

    #[test]
    fn weighted_median_output_is_one_of_the_inputs() {
        let subs = vec![
            sub("val-a", "10", 1),
            sub("val-b", "11", 5),
            sub("val-c", "12", 1),
        ];
        let sorted = sort_by_price(subs.clone());
        let price = weighted_median(&sorted);
        assert!(subs.iter().any(|s| s.price == price));
    }

    #[test]
    fn determinism_is_independent_of_input_order() {
        let forward = vec![
            sub("val-a", "100", 10),
            sub("val-b", "101", 10),
            sub("val-c", "99", 10),
            sub("val-d", "500", 10),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let out_a = aggregate(
            &"X/USD".to_string(),
            forward,
            40,
            Decimal::ZERO,
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        );
        let out_b = aggregate(
            &"X/USD".to_string(),
            reversed,
            40,
            Decimal::ZERO,
            Decimal::from_scaled(50, 2).unwrap(),
            false,
            0,
        );
        assert_eq!(out_a.unwrap().price, out_b.unwrap().price);
    }

    #[test]
    fn no_submissions_is_an_error() {
        let out = aggregate(&"X/USD".to_string(), vec![], 100, Decimal::ZERO, Decimal::ZERO, false, 0);
        assert!(matches!(out, Err(OracleError::NoSubmissions(_))));
    }

    #[test]
    fn geographic_diversity_gate_rejects_a_single_region() {
        let subs = vec![
            Submission { validator: ValidatorAddr("val-a".to_string()), price: parse_decimal("10.00"), voting_power: 1, region: "us".to_string() },
            Submission { validator: ValidatorAddr("val-b".to_string()), price: parse_decimal("10.00"), voting_power: 1, region: "us".to_string() },
        ];
        let out = aggregate(&"ATOM/USD".to_string(), subs, 2, Decimal::ZERO, Decimal::from_scaled(50, 2).unwrap(), true, 2);
        assert!(matches!(out, Err(OracleError::InsufficientDiversity { found: 1, required: 2 })));
    }

    #[test]
    fn geographic_diversity_gate_passes_with_enough_distinct_regions() {
        let subs = vec![
            Submission { validator: ValidatorAddr("val-a".to_string()), price: parse_decimal("10.00"), voting_power: 1, region: "us".to_string() },
            Submission { validator: ValidatorAddr("val-b".to_string()), price: parse_decimal("10.00"), voting_power: 1, region: "eu".to_string() },
        ];
        let out = aggregate(&"ATOM/USD".to_string(), subs, 2, Decimal::ZERO, Decimal::from_scaled(50, 2).unwrap(), true, 2);
        assert!(out.is_ok());
    }
}
