use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

/// All monetary amounts carry eight decimal places (satoshi resolution).
pub const MONEY_SCALE: u32 = 8;

/// Quantize a monetary amount to [`MONEY_SCALE`] with half-even rounding.
pub fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Division that treats a zero denominator as zero instead of failing.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        round(numerator / denominator)
    }
}

/// `percent` of `value`, e.g. `percent_of(200, 5) == 10`.
pub fn percent_of(value: Decimal, percent: Decimal) -> Decimal {
    round(value * percent / Decimal::ONE_HUNDRED)
}

/// `value` grown (or shrunk, for negative percents) by `percent`.
pub fn apply_percent(value: Decimal, percent: Decimal) -> Decimal {
    round(value * (Decimal::ONE + percent / Decimal::ONE_HUNDRED))
}

/// Boundary conversion from floating point. Lossy: doubles cannot represent
/// most decimal fractions exactly, so only use this on external input.
pub fn from_f64_lossy(value: f64) -> Decimal {
    Decimal::from_f64(value).map(round).unwrap_or(Decimal::ZERO)
}

/// Compound `start` by `rate_percent` per period over `periods` periods.
pub fn compound_growth(start: Decimal, rate_percent: Decimal, periods: u32) -> Decimal {
    let factor = Decimal::ONE + rate_percent / Decimal::ONE_HUNDRED;
    let mut value = start;
    for _ in 0..periods {
        value *= factor;
    }
    round(value)
}

/// Simple (non-compounding) growth of `start` by `rate_percent` per period.
pub fn simple_growth(start: Decimal, rate_percent: Decimal, periods: u32) -> Decimal {
    round(start + percent_of(start, rate_percent) * Decimal::from(periods))
}

/// Format a monetary amount as a dollar string with thousands separators,
/// rounded to cents: `1234567.891 -> "$1,234,567.89"`.
pub fn format_usd(value: Decimal) -> String {
    let cents = value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    let negative = cents.is_sign_negative();
    let text = cents.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), format!("{f:0<2}")),
        None => (text, "00".to_string()),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}${grouped}.{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_even_at_scale_8() {
        // Exactly halfway: 0.000000125 -> 0.00000012 (even), not 0.00000013
        assert_eq!(round(dec!(0.000000125)), dec!(0.00000012));
        assert_eq!(round(dec!(0.000000135)), dec!(0.00000014));
    }

    #[test]
    fn safe_div_returns_zero_on_zero_denominator() {
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
    }

    #[test]
    fn percent_helpers() {
        assert_eq!(percent_of(dec!(200), dec!(5)), dec!(10));
        assert_eq!(apply_percent(dec!(100), dec!(5)), dec!(105));
        assert_eq!(apply_percent(dec!(100), dec!(-5)), dec!(95));
    }

    #[test]
    fn growth_helpers() {
        assert_eq!(simple_growth(dec!(100), dec!(10), 3), dec!(130));
        assert_eq!(compound_growth(dec!(100), dec!(10), 2), dec!(121));
    }

    #[test]
    fn usd_formatting() {
        assert_eq!(format_usd(dec!(1234567.891)), "$1,234,567.89");
        assert_eq!(format_usd(dec!(0.5)), "$0.50");
        assert_eq!(format_usd(dec!(-42)), "-$42.00");
    }
}
