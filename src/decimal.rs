//! Fixed-point signed decimal used for every consensus-path calculation.
//!
//! Mirrors the teacher's `PriceData`/zero-copy numeric types (fixed layout, no
//! heap allocation, `Pod`-friendly) but widens the backing integer to 256 bits
//! via `ethnum::I256` so that intermediate products in the aggregation pipeline
//! (price * voting-power, squared deviations, …) cannot silently overflow the
//! way a 128-bit accumulator would on adversarial inputs.
//!
//! Floating point is never used here; see `scorer.rs` for the one place the
//! spec permits it (a read-only, non-consensus metric).

use std::fmt;

use ethnum::I256;
use serde::{Deserialize, Serialize};

/// Number of fractional decimal digits carried by every [`Decimal`].
pub const DECIMAL_PLACES: u32 = 18;

/// 10^18, the scale factor separating the integer and fractional parts.
const SCALE: I256 = I256::from_words(0, 1_000_000_000_000_000_000);

/// A signed fixed-point number with 18 fractional digits, backed by a 256-bit
/// integer. `Decimal::raw` is the value multiplied by `10^18`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Decimal {
    raw: I256,
}

/// Errors produced by exact fixed-point arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecimalError {
    #[error("decimal overflow")]
    Overflow,
    #[error("division by zero")]
    DivisionByZero,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal { raw: I256::ZERO };
    pub const ONE: Decimal = Decimal { raw: SCALE };

    #[inline]
    pub const fn from_raw(raw: I256) -> Self {
        Decimal { raw }
    }

    #[inline]
    pub const fn raw(self) -> I256 {
        self.raw
    }

    /// Builds a `Decimal` from an integer number of whole units.
    pub fn from_i128(units: i128) -> Self {
        Decimal { raw: I256::from(units).saturating_mul(SCALE) }
    }

    /// Builds a `Decimal` from a base-unit integer and its number of fractional
    /// digits, e.g. `from_scaled(1050, 2)` is `10.50`. Used to ingest prices
    /// carried at a foreign scale (cross-chain feeds, overrides) without
    /// floating point.
    pub fn from_scaled(value: i128, decimals: u32) -> Result<Self, DecimalError> {
        let value = I256::from(value);
        if decimals <= DECIMAL_PLACES {
            let factor = pow10(DECIMAL_PLACES - decimals);
            value.checked_mul(factor).map(|raw| Decimal { raw }).ok_or(DecimalError::Overflow)
        } else {
            let factor = pow10(decimals - DECIMAL_PLACES);
            Ok(Decimal { raw: value / factor })
        }
    }

    pub fn is_zero(self) -> bool {
        self.raw == I256::ZERO
    }

    pub fn is_positive(self) -> bool {
        self.raw > I256::ZERO
    }

    pub fn is_negative(self) -> bool {
        self.raw < I256::ZERO
    }

    pub fn abs(self) -> Self {
        if self.raw < I256::ZERO {
            Decimal { raw: -self.raw }
        } else {
            self
        }
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, DecimalError> {
        self.raw.checked_add(rhs.raw).map(|raw| Decimal { raw }).ok_or(DecimalError::Overflow)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, DecimalError> {
        self.raw.checked_sub(rhs.raw).map(|raw| Decimal { raw }).ok_or(DecimalError::Overflow)
    }

    pub fn checked_mul(self, rhs: Self) -> Result<Self, DecimalError> {
        let wide = self.raw.checked_mul(rhs.raw).ok_or(DecimalError::Overflow)?;
        Ok(Decimal { raw: wide / SCALE })
    }

    pub fn checked_div(self, rhs: Self) -> Result<Self, DecimalError> {
        if rhs.raw == I256::ZERO {
            return Err(DecimalError::DivisionByZero);
        }
        let wide = self.raw.checked_mul(SCALE).ok_or(DecimalError::Overflow)?;
        Ok(Decimal { raw: wide / rhs.raw })
    }

    /// Multiplies by a dimensionless integer ratio `num/den` without
    /// intermediate rescaling — used for voting-power-weighted sums where
    /// `num`/`den` are integer power units, not `Decimal`s themselves.
    pub fn checked_mul_ratio(self, num: u128, den: u128) -> Result<Self, DecimalError> {
        if den == 0 {
            return Err(DecimalError::DivisionByZero);
        }
        let wide = self.raw.checked_mul(I256::from(num)).ok_or(DecimalError::Overflow)?;
        Ok(Decimal { raw: wide / I256::from(den) })
    }

    /// Average of two decimals, exact to the last fractional digit.
    pub fn midpoint(a: Self, b: Self) -> Self {
        Decimal { raw: (a.raw + b.raw) / I256::from(2i32) }
    }

    /// Linear interpolation: `a + (b - a) * t_num / t_den`.
    pub fn lerp(a: Self, b: Self, t_num: u128, t_den: u128) -> Result<Self, DecimalError> {
        let span = b.checked_sub(a)?;
        let scaled = span.checked_mul_ratio(t_num, t_den)?;
        a.checked_add(scaled)
    }

    /// Big-endian byte encoding for the KV-store: fixed 32 bytes, sorts the
    /// same as the numeric value would for same-signedness comparisons (the
    /// store only ever compares keys, never raw values, so this is purely
    /// for deterministic, architecture-independent persistence).
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.raw.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Decimal { raw: I256::from_be_bytes(bytes) }
    }
}

fn pow10(exp: u32) -> I256 {
    let mut v = I256::ONE;
    for _ in 0..exp {
        v *= I256::from(10i32);
    }
    v
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({})", self)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let neg = self.raw < I256::ZERO;
        let abs = self.abs().raw;
        let int_part = abs / SCALE;
        let frac_part = abs % SCALE;
        if neg {
            write!(f, "-")?;
        }
        write!(f, "{}.{:018}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_whole_units() {
        let d = Decimal::from_i128(10);
        assert_eq!(d.to_string(), "10.000000000000000000");
    }

    #[test]
    fn add_sub_are_exact() {
        let a = Decimal::from_i128(10);
        let b = Decimal::from_scaled(5, 2).unwrap(); // 0.05
        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum.to_string(), "10.050000000000000000");
        assert_eq!(sum.checked_sub(b).unwrap(), a);
    }

    #[test]
    fn mul_div_round_trip() {
        let a = Decimal::from_i128(7);
        let b = Decimal::from_i128(3);
        let product = a.checked_mul(b).unwrap();
        assert_eq!(product, Decimal::from_i128(21));
        let quotient = product.checked_div(b).unwrap();
        assert_eq!(quotient, a);
    }

    #[test]
    fn div_by_zero_errors() {
        let a = Decimal::from_i128(1);
        assert_eq!(a.checked_div(Decimal::ZERO), Err(DecimalError::DivisionByZero));
    }

    #[test]
    fn midpoint_matches_average() {
        let a = Decimal::from_i128(10);
        let b = Decimal::from_i128(20);
        assert_eq!(Decimal::midpoint(a, b), Decimal::from_i128(15));
    }

    #[test]
    fn abs_and_sign_checks() {
        let neg = Decimal::from_i128(-5);
        assert!(neg.is_negative());
        assert_eq!(neg.abs(), Decimal::from_i128(5));
    }

    #[test]
    fn from_scaled_rescales_down_and_up() {
        // 12345 at 2 decimals == 123.45
        let v = Decimal::from_scaled(12345, 2).unwrap();
        assert_eq!(v.to_string(), "123.450000000000000000");
        // 12345 at 20 decimals (more precise than our scale) truncates.
        let v2 = Decimal::from_scaled(12345, 20).unwrap();
        assert_eq!(v2.raw(), I256::from(123i32));
    }
}
