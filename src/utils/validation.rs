//! Input validation constants and helpers.
//!
//! Addresses and POIs come back from the subgraph as free-form strings. These helpers
//! normalize them before they are used as join keys.

// ============================================
// Network Constants
// ============================================

/// Default thawing period in epochs.
pub const DEFAULT_THAWING_PERIOD_EPOCHS: i64 = 28;

/// Epoch duration in seconds (approximately 24 hours).
pub const EPOCH_DURATION_SECONDS: i64 = 86_400;

/// A POI of all zeros means the allocation was closed without claiming rewards.
pub const ZERO_POI: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

// ============================================
// Helpers
// ============================================

/// Lowercase an address and make sure it carries the `0x` prefix.
#[inline]
pub fn normalize_address(address: &str) -> String {
    let addr = address.trim().to_lowercase();
    if addr.starts_with("0x") {
        addr
    } else {
        format!("0x{}", addr)
    }
}

/// Whether `input` is an address rather than a name: `0x`-prefixed, or 40 hex digits.
#[inline]
pub fn looks_like_address(input: &str) -> bool {
    let input = input.trim();
    let lower = input.to_lowercase();
    lower.starts_with("0x") || (input.len() == 40 && input.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Whether a closed allocation submitted a real proof of indexing.
#[inline]
pub fn is_submitted_poi(poi: Option<&str>) -> bool {
    match poi {
        Some(p) => {
            let p = p.trim();
            !p.is_empty() && !p.eq_ignore_ascii_case(ZERO_POI) && p != "0x"
        },
        None => false,
    }
}

/// Validate a report window length in hours.
#[inline]
pub fn validate_window_hours(hours: i64) -> Option<i64> {
    if hours > 0 {
        Some(hours)
    } else {
        None
    }
}
