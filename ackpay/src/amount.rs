//! Human-readable currency amount parsing.
//!
//! Display-layer helper only: every protocol comparison operates on integer
//! subunits, so conversion happens once at the edge and the result is exact
//! or an error, never rounded.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

/// Errors from amount parsing.
#[derive(Debug, thiserror::Error)]
pub enum AmountError {
    /// The string is not a decimal number.
    #[error("Invalid amount: {0}")]
    Invalid(String),
    /// The amount has more fractional digits than the currency supports.
    #[error("Amount {0} has more than {1} decimal places")]
    TooPrecise(String, u8),
    /// The amount is negative or does not fit in 64 bits of subunits.
    #[error("Amount {0} is out of range")]
    OutOfRange(String),
}

/// Parses a human-readable decimal amount into integer subunits.
///
/// `parse_units("10.50", 6)` yields `10_500_000`.
///
/// # Errors
///
/// Returns [`AmountError`] if the string is not a decimal, carries more
/// fractional digits than `decimals`, or falls outside `0..=u64::MAX`
/// subunits.
pub fn parse_units(s: &str, decimals: u8) -> Result<u64, AmountError> {
    if decimals > 19 {
        // 10^20 exceeds u64 subunits; no supported currency goes there.
        return Err(AmountError::OutOfRange(s.to_owned()));
    }
    let value = Decimal::from_str(s.trim()).map_err(|_| AmountError::Invalid(s.to_owned()))?;
    if value.is_sign_negative() {
        return Err(AmountError::OutOfRange(s.to_owned()));
    }
    if value.scale() > u32::from(decimals) {
        // Trailing zeros are fine; actual extra precision is not.
        let normalized = value.normalize();
        if normalized.scale() > u32::from(decimals) {
            return Err(AmountError::TooPrecise(s.to_owned(), decimals));
        }
    }
    let scale = Decimal::from(10u64.pow(u32::from(decimals)));
    let subunits = value
        .checked_mul(scale)
        .ok_or_else(|| AmountError::OutOfRange(s.to_owned()))?;
    subunits
        .to_u64()
        .ok_or_else(|| AmountError::OutOfRange(s.to_owned()))
}

/// Formats integer subunits as a human-readable decimal string.
///
/// `format_units(10_500_000, 6)` yields `"10.5"`.
#[must_use]
pub fn format_units(amount: u64, decimals: u8) -> String {
    let mut value = Decimal::from(amount);
    value.set_scale(u32::from(decimals)).unwrap_or_default();
    value.normalize().to_string()
}
