//! Canonical amount handling: integer minor units.
//!
//! Every amount in the ledger is an integer count of the currency's minor
//! unit (cents, paise). Gateways disagree about native representation --
//! PayPal reports decimal major-unit strings ("12.50"), Razorpay reports
//! integer minor units (1250) -- so every conversion in the codebase goes
//! through this module. String-based integer math only; a floating-point
//! round of a money amount is a critical bug, not a rounding error.

use crate::error::{AppError, Result};

/// Upper plausibility bound for any single amount, in minor units.
/// One billion major units at exponent 2. Anything above this is treated
/// as a unit-conversion fault rather than a real amount.
pub const MAX_AMOUNT_MINOR: i64 = 100_000_000_000;

/// Number of minor-unit digits for an ISO 4217 currency code.
/// Defaults to 2; the zero- and three-decimal currencies are enumerated.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_lowercase().as_str() {
        "bhd" | "jod" | "kwd" | "omr" | "tnd" => 3,
        "bif" | "clp" | "djf" | "gnf" | "jpy" | "kmf" | "krw" | "mga" | "pyg" | "rwf"
        | "ugx" | "vnd" | "vuv" | "xaf" | "xof" | "xpf" => 0,
        _ => 2,
    }
}

fn pow10(exp: u32) -> i64 {
    10i64.pow(exp)
}

/// Reject amounts that cannot be a real refund: negative, zero-or-below
/// bounds are checked by callers where zero is legal.
pub fn check_plausible(minor: i64, context: &str) -> Result<()> {
    if minor < 0 {
        return Err(AppError::UnitMismatch(format!(
            "negative amount {} ({})",
            minor, context
        )));
    }
    if minor > MAX_AMOUNT_MINOR {
        return Err(AppError::UnitMismatch(format!(
            "implausibly large amount {} ({})",
            minor, context
        )));
    }
    Ok(())
}

/// Parse a gateway decimal major-unit string ("12.50") into minor units.
///
/// Exact: digits only, no float anywhere. Rejects negatives, more fractional
/// digits than the currency carries, and values beyond the plausibility
/// bound.
pub fn major_to_minor(value: &str, currency: &str) -> Result<i64> {
    let exp = currency_exponent(currency);
    let value = value.trim();

    if value.is_empty() {
        return Err(AppError::UnitMismatch(format!(
            "empty amount for currency {}",
            currency
        )));
    }
    if value.starts_with('-') || value.starts_with('+') {
        return Err(AppError::UnitMismatch(format!(
            "signed amount '{}' for currency {}",
            value, currency
        )));
    }

    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };

    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(AppError::UnitMismatch(format!(
            "malformed amount '{}' for currency {}",
            value, currency
        )));
    }
    if frac.len() > exp as usize {
        return Err(AppError::UnitMismatch(format!(
            "amount '{}' has more than {} fractional digits for currency {}",
            value, exp, currency
        )));
    }

    let whole: i64 = whole.parse().map_err(|_| {
        AppError::UnitMismatch(format!("amount '{}' out of range", value))
    })?;

    // Right-pad the fractional part to the currency exponent: "5" -> 50 cents.
    let mut frac_minor: i64 = 0;
    if !frac.is_empty() {
        frac_minor = frac.parse().map_err(|_| {
            AppError::UnitMismatch(format!("amount '{}' out of range", value))
        })?;
        frac_minor *= pow10(exp - frac.len() as u32);
    }

    let minor = whole
        .checked_mul(pow10(exp))
        .and_then(|w| w.checked_add(frac_minor))
        .ok_or_else(|| AppError::UnitMismatch(format!("amount '{}' overflows", value)))?;

    check_plausible(minor, currency)?;
    Ok(minor)
}

/// Render minor units as the gateway decimal major-unit string.
/// Inverse of [`major_to_minor`] for any valid amount.
pub fn minor_to_major(minor: i64, currency: &str) -> Result<String> {
    check_plausible(minor, currency)?;
    let exp = currency_exponent(currency);
    if exp == 0 {
        return Ok(minor.to_string());
    }
    let scale = pow10(exp);
    Ok(format!(
        "{}.{:0width$}",
        minor / scale,
        minor % scale,
        width = exp as usize
    ))
}
