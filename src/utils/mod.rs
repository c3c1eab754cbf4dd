//! Utility functions for the grtinfo tools.
//!
//! This module is organized into focused submodules:
//!
//! - [`validation`] - Network constants, address and POI normalization
//! - [`conversion`] - Wei / PPM conversions and checked `BigDecimal` arithmetic
//! - [`format`] - Plain-text formatting of tokens, percentages and durations

mod conversion;
mod format;
mod validation;

// ============================================
// Re-exports
// ============================================

// Conversion utilities
pub use conversion::{
    checked_div, checked_percent, clamp_non_negative, ppm_to_fraction, wei_to_grt, GRT_DECIMALS,
};

// Formatting utilities
pub use format::{
    format_duration, format_fraction_percent, format_percent, format_timestamp, format_tokens,
    format_tokens_short,
};

// Validation utilities
pub use validation::{
    is_submitted_poi, looks_like_address, normalize_address, validate_window_hours, DEFAULT_THAWING_PERIOD_EPOCHS,
    EPOCH_DURATION_SECONDS, ZERO_POI,
};
