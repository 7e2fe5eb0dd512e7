//! Shared fixed-scale decimal handling for money and quantities.
//!
//! Both are stored with two fractional digits, rounded half-up, and
//! travel as canonical strings on the wire and in SQLite.

use bigdecimal::{BigDecimal, RoundingMode};
use serde::Deserialize;
use std::str::FromStr;

pub(crate) const SCALE: i64 = 2;

pub(crate) fn normalize(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(SCALE, RoundingMode::HalfUp)
}

pub(crate) fn parse(raw: &str) -> Option<BigDecimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    BigDecimal::from_str(trimmed).ok().map(|v| normalize(&v))
}

pub(crate) fn zero() -> BigDecimal {
    normalize(&BigDecimal::from(0))
}

/// Accepts `"12.50"` as well as `12.5` in request bodies.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum DecimalInput {
    Text(String),
    Number(serde_json::Number),
}

impl DecimalInput {
    pub(crate) fn into_raw(self) -> String {
        match self {
            DecimalInput::Text(s) => s,
            DecimalInput::Number(n) => n.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rounds_half_up() {
        assert_eq!(parse("1.005").unwrap().to_string(), "1.01");
        assert_eq!(parse("2").unwrap().to_string(), "2.00");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("abc").is_none());
        assert!(parse("   ").is_none());
    }
}
