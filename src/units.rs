use crate::error::UnitError;

/// Decimal count assumed when a token's metadata is unknown (native SOL convention).
pub const DEFAULT_DECIMALS: u8 = 9;

/// `floor(human * 10^decimals)` computed on the decimal string itself, so no
/// float rounding leaks into the base-unit amount.
pub fn to_base_units(human: &str, decimals: u8) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidAmount(human.to_string());
    let s = human.trim();

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    let scale = 10u128.checked_pow(decimals as u32).ok_or_else(invalid)?;
    let whole: u128 = if int_part.is_empty() { 0 } else { int_part.parse().map_err(|_| invalid())? };

    // Digits past `decimals` are dropped, which is the floor for non-negative input.
    let kept: String = frac_part.chars().take(decimals as usize).collect();
    let frac: u128 = if kept.is_empty() {
        0
    } else {
        let padded = format!("{kept:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| invalid())?
    };

    let total = whole.checked_mul(scale).and_then(|w| w.checked_add(frac)).ok_or_else(invalid)?;
    if total == 0 {
        return Err(invalid());
    }
    u64::try_from(total).map_err(|_| invalid())
}

pub fn from_base_units(base_units: u64, decimals: u8) -> f64 {
    base_units as f64 / 10f64.powi(decimals as i32)
}

/// Exact decimal rendering of a base-unit amount, trailing zeros trimmed.
pub fn format_base_units(base_units: u64, decimals: u8) -> String {
    let scale = 10u128.pow(decimals as u32);
    let whole = base_units as u128 / scale;
    let frac = base_units as u128 % scale;
    if decimals == 0 || frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
