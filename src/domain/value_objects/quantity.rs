use super::decimal::{self, DecimalInput};
use crate::domain::errors::ValidationError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Stock quantity with two fractional digits. Never negative.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity(BigDecimal);

impl Quantity {
    pub fn new(value: BigDecimal) -> Result<Self, ValidationError> {
        let value = decimal::normalize(&value);
        if value < decimal::zero() {
            return Err(ValidationError::MustBeNonNegative);
        }
        Ok(Quantity(value))
    }

    pub fn zero() -> Self {
        Quantity(decimal::zero())
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value =
            decimal::parse(raw).ok_or_else(|| ValidationError::InvalidQuantity(raw.to_string()))?;
        Quantity::new(value)
    }

    /// Parse a quantity that must be strictly greater than zero.
    pub fn positive(raw: &str) -> Result<Self, ValidationError> {
        let qty = Quantity::parse(raw)?;
        if !qty.is_positive() {
            return Err(ValidationError::MustBePositive);
        }
        Ok(qty)
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > decimal::zero()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == decimal::zero()
    }

    pub fn add(&self, other: &Quantity) -> Quantity {
        Quantity(decimal::normalize(&(&self.0 + &other.0)))
    }

    /// Subtract, refusing to go below zero.
    pub fn checked_sub(&self, other: &Quantity) -> Result<Quantity, ValidationError> {
        Quantity::new(&self.0 - &other.0)
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        self.checked_sub(other).unwrap_or_else(|_| Quantity::zero())
    }

    /// The quantity divided by one hundred, e.g. kilograms to quintals.
    pub fn per_hundred(&self) -> BigDecimal {
        decimal::normalize(&(self.0.clone() / BigDecimal::from(100)))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Quantity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = DecimalInput::deserialize(deserializer)?.into_raw();
        Quantity::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_parse_valid() {
        let qty = Quantity::parse("100");
        assert!(qty.is_ok());
        assert_eq!(qty.unwrap().to_string(), "100.00");
    }

    #[test]
    fn test_quantity_parse_negative() {
        let qty = Quantity::parse("-5");
        assert!(matches!(qty, Err(ValidationError::MustBeNonNegative)));
    }

    #[test]
    fn test_quantity_positive_rejects_zero() {
        assert!(matches!(
            Quantity::positive("0"),
            Err(ValidationError::MustBePositive)
        ));
        assert!(Quantity::positive("0.01").is_ok());
    }

    #[test]
    fn test_quantity_add() {
        let q1 = Quantity::parse("10.25").unwrap();
        let q2 = Quantity::parse("5").unwrap();
        assert_eq!(q1.add(&q2).to_string(), "15.25");
    }

    #[test]
    fn test_quantity_checked_sub_insufficient() {
        let q1 = Quantity::parse("5").unwrap();
        let q2 = Quantity::parse("10").unwrap();
        assert!(q1.checked_sub(&q2).is_err());
        assert!(q1.saturating_sub(&q2).is_zero());
    }

    #[test]
    fn test_quantity_per_hundred() {
        let qty = Quantity::parse("250").unwrap();
        assert_eq!(qty.per_hundred(), BigDecimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_quantity_deserializes_from_number_and_string() {
        let a: Quantity = serde_json::from_str("12.5").unwrap();
        let b: Quantity = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"12.50\"");
    }
}
