//! Display helpers for countdowns, addresses and ether amounts.

use fhe_quest_protocol::{Address, Wei, WEI_PER_ETHER};

const ETHER_DECIMALS: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("invalid ether amount: {0:?}")]
    Invalid(String),

    #[error("ether amount {0:?} has more than 18 decimals")]
    TooPrecise(String),

    #[error("ether amount {0:?} overflows")]
    Overflow(String),
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// `0x1234...abcd`
pub fn format_address(address: &Address) -> String {
    let raw = address.as_str();
    format!("{}...{}", &raw[..6], &raw[raw.len() - 4..])
}

/// Decimal ether string with trailing zeros trimmed, e.g. `0.001` or `1.0`.
pub fn format_ether(amount: Wei) -> String {
    let whole = amount.0 / WEI_PER_ETHER;
    let frac = amount.0 % WEI_PER_ETHER;
    let frac = format!("{frac:0width$}", width = ETHER_DECIMALS);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{frac}")
    }
}

/// Parses a decimal ether string such as `"0.01"` into wei.
pub fn parse_ether(raw: &str) -> Result<Wei, AmountError> {
    let trimmed = raw.trim();
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
        return Err(AmountError::Invalid(raw.to_string()));
    }
    if frac.len() > ETHER_DECIMALS {
        return Err(AmountError::TooPrecise(raw.to_string()));
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::Overflow(raw.to_string()))?
    };
    let frac_wei: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = ETHER_DECIMALS);
        padded.parse().map_err(|_| AmountError::Invalid(raw.to_string()))?
    };

    whole
        .checked_mul(WEI_PER_ETHER)
        .and_then(|w| w.checked_add(frac_wei))
        .map(Wei)
        .ok_or_else(|| AmountError::Overflow(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(0), "00:00:00");
        assert_eq!(format_time(3661), "01:01:01");
        assert_eq!(format_time(3600), "01:00:00");
        assert_eq!(format_time(59), "00:00:59");
        assert_eq!(format_time(100 * 3600), "100:00:00");
    }

    #[test]
    fn address_is_shortened() {
        let addr = Address::parse("0x1234567890abcdef1234567890abcdef1234abcd").unwrap();
        assert_eq!(format_address(&addr), "0x1234...abcd");
    }

    #[test]
    fn ether_formatting() {
        assert_eq!(format_ether(Wei(1_000_000_000_000_000)), "0.001");
        assert_eq!(format_ether(Wei::from_ether(2)), "2.0");
        assert_eq!(format_ether(Wei(1_500_000_000_000_000_000)), "1.5");
        assert_eq!(format_ether(Wei(1)), "0.000000000000000001");
        assert_eq!(format_ether(Wei::ZERO), "0.0");
    }

    #[test]
    fn ether_parsing() {
        assert_eq!(parse_ether("0.01"), Ok(Wei(10_000_000_000_000_000)));
        assert_eq!(parse_ether("1"), Ok(Wei::from_ether(1)));
        assert_eq!(parse_ether(".5"), Ok(Wei(500_000_000_000_000_000)));
        assert_eq!(parse_ether("0.001"), Ok(Wei(1_000_000_000_000_000)));
        assert!(matches!(parse_ether(""), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_ether("1.2.3"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_ether("-1"), Err(AmountError::Invalid(_))));
        assert!(matches!(
            parse_ether("0.0000000000000000001"),
            Err(AmountError::TooPrecise(_))
        ));
    }
}
