//! Human-readable formatting of report figures.
//!
//! Plain text only. Rounding goes through `BigDecimal` so the printed value is the
//! same one the report model carries.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::{Signed, Zero};

/// Format a token amount with thousands separators, e.g. `"1,234,567 GRT"`.
///
/// Amounts below one token keep two decimals.
pub fn format_tokens(amount: &BigDecimal) -> String {
    let one = BigDecimal::from(1);
    if amount.is_zero() {
        "0 GRT".to_string()
    } else if amount.is_positive() && *amount < one {
        format!("{} GRT", fixed(amount, 2))
    } else {
        format!("{} GRT", group_thousands(&fixed(amount, 0)))
    }
}

/// Short token amount, e.g. `"1.2M"` or `"456k"`.
pub fn format_tokens_short(amount: &BigDecimal) -> String {
    let million = BigDecimal::from(1_000_000);
    let thousand = BigDecimal::from(1_000);
    if *amount >= million {
        format!("{}M", fixed(&(amount / &million), 1))
    } else if *amount >= thousand {
        format!("{}k", fixed(&(amount / &thousand), 0))
    } else if *amount >= BigDecimal::from(1) {
        group_thousands(&fixed(amount, 0))
    } else {
        fixed(amount, 2)
    }
}

/// Format an already-multiplied percentage value, e.g. `73.333` -> `"73.33%"`.
pub fn format_percent(value: &BigDecimal) -> String {
    format!("{}%", fixed(value, 2))
}

/// Format a fraction (e.g. a reward cut of `0.265`) as a percentage.
pub fn format_fraction_percent(fraction: &BigDecimal) -> String {
    format_percent(&(fraction * BigDecimal::from(100)))
}

/// Format a duration in seconds: `"3d 5h"`, `"2h 30m"`, `"45m"`, `"30s"`.
///
/// Negative durations print as `"expired"`.
pub fn format_duration(seconds: i64) -> String {
    if seconds < 0 {
        return "expired".to_string();
    }

    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        if minutes > 0 && hours < 12 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM` (UTC).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

fn fixed(value: &BigDecimal, digits: i64) -> String {
    value.round(digits).with_scale(digits).to_string()
}

/// Insert `,` separators in the integer part of a plain decimal string.
fn group_thousands(plain: &str) -> String {
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}
