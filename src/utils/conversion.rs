//! Numeric conversion utilities.
//!
//! The subgraph returns token amounts as wei strings (18 decimals) and reward cuts as PPM
//! integers. Everything is converted to `BigDecimal` so aggregation over many small amounts
//! never drifts the way binary floating point would.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::Zero;
use once_cell::sync::Lazy;
use std::str::FromStr;

/// GRT token decimals.
pub const GRT_DECIMALS: u8 = 18;

/// Reward cuts are parts per million.
const PPM_DECIMALS: u8 = 6;

// ============================================
// Subgraph String Conversions
// ============================================

/// Parse a wei amount (integer string, possibly negative) into whole GRT.
///
/// Returns `None` if the string is not an integer.
///
/// # Example
/// ```ignore
/// let grt = wei_to_grt("1500000000000000000000").unwrap(); // 1500 GRT
/// ```
pub fn wei_to_grt(value_str: &str) -> Option<BigDecimal> {
    let wei = BigInt::from_str(value_str.trim()).ok()?;
    Some(BigDecimal::new(wei, GRT_DECIMALS as i64))
}

/// Convert a PPM value (e.g. `"265000"`) into a fraction (`0.265`).
pub fn ppm_to_fraction(value_str: &str) -> Option<BigDecimal> {
    let ppm = BigInt::from_str(value_str.trim()).ok()?;
    Some(BigDecimal::from(ppm) / big_pow10(PPM_DECIMALS))
}

// ============================================
// BigDecimal Arithmetic
// ============================================

/// Divide, returning `None` when the denominator is zero.
pub fn checked_div(numerator: &BigDecimal, denominator: &BigDecimal) -> Option<BigDecimal> {
    if denominator.is_zero() {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// `numerator / denominator * 100`, or `None` when the denominator is zero.
pub fn checked_percent(numerator: &BigDecimal, denominator: &BigDecimal) -> Option<BigDecimal> {
    checked_div(numerator, denominator).map(|ratio| ratio * BigDecimal::from(100))
}

/// Saturate negative values at zero.
pub fn clamp_non_negative(value: BigDecimal) -> BigDecimal {
    if value < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        value
    }
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}
