//! Fixed-point native and reference amounts.
//!
//! Both scales carry 18 decimals: `1 native = 10^18` base units, and a
//! reference value of `50 * 10^18` means fifty USD-like units.

use thiserror::Error;

/// Native currency amount in base units.
pub type NativeAmount = u128;

/// Reference (USD-like) amount in 18-decimal fixed point.
pub type ReferenceAmount = u128;

pub const NATIVE_DECIMALS: u32 = 18;

/// One whole native unit in base units.
pub const NATIVE_UNIT: NativeAmount = 10u128.pow(NATIVE_DECIMALS);

/// Smallest accepted contribution, in reference units.
pub const MINIMUM_USD: ReferenceAmount = 50 * NATIVE_UNIT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("malformed amount `{0}`")]
    Malformed(String),
    #[error("amount `{0}` has more than 18 fractional digits")]
    TooPrecise(String),
    #[error("amount `{0}` does not fit in 128 bits")]
    Overflow(String),
}

/// Parses a decimal string such as `"0.025"` into native base units.
pub fn parse_native(input: &str) -> Result<NativeAmount, UnitsError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Malformed(s.to_string()));
    }
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if !digits(whole) || !digits(frac) {
        return Err(UnitsError::Malformed(s.to_string()));
    }
    if frac.len() > NATIVE_DECIMALS as usize {
        return Err(UnitsError::TooPrecise(s.to_string()));
    }

    let overflow = || UnitsError::Overflow(s.to_string());
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let scale = 10u128.pow(NATIVE_DECIMALS - frac.len() as u32);
        frac.parse::<u128>().map_err(|_| overflow())? * scale
    };
    whole
        .checked_mul(NATIVE_UNIT)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Renders base units as a trimmed decimal string (`1500000000000000000` → `"1.5"`).
pub fn format_native(amount: NativeAmount) -> String {
    let whole = amount / NATIVE_UNIT;
    let frac = amount % NATIVE_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:018}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_native("1").unwrap(), NATIVE_UNIT);
        assert_eq!(parse_native("0.01").unwrap(), NATIVE_UNIT / 100);
        assert_eq!(parse_native(".5").unwrap(), NATIVE_UNIT / 2);
        assert_eq!(parse_native("2.").unwrap(), 2 * NATIVE_UNIT);
        assert_eq!(parse_native("0.000000000000000001").unwrap(), 1);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse_native("  "), Err(UnitsError::Empty));
        assert!(matches!(parse_native("-1"), Err(UnitsError::Malformed(_))));
        assert!(matches!(parse_native("1.2.3"), Err(UnitsError::Malformed(_))));
        assert!(matches!(parse_native("."), Err(UnitsError::Malformed(_))));
        assert!(matches!(
            parse_native("0.0000000000000000001"),
            Err(UnitsError::TooPrecise(_))
        ));
        assert!(matches!(
            parse_native("999999999999999999999999"),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn formats_trimmed() {
        assert_eq!(format_native(0), "0");
        assert_eq!(format_native(NATIVE_UNIT * 3 / 2), "1.5");
        assert_eq!(format_native(25 * NATIVE_UNIT / 1000), "0.025");
        assert_eq!(format_native(1), "0.000000000000000001");
    }
}
