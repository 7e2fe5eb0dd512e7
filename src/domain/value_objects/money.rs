use super::decimal::{self, DecimalInput};
use crate::domain::errors::ValidationError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Price or offer amount in rupees, two fractional digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Money(BigDecimal);

impl Money {
    pub fn new(value: BigDecimal) -> Result<Self, ValidationError> {
        let value = decimal::normalize(&value);
        if value < decimal::zero() {
            return Err(ValidationError::MustBeNonNegative);
        }
        Ok(Money(value))
    }

    pub fn zero() -> Self {
        Money(decimal::zero())
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value =
            decimal::parse(raw).ok_or_else(|| ValidationError::InvalidAmount(raw.to_string()))?;
        Money::new(value)
    }

    /// Parse an amount that must be strictly greater than zero.
    pub fn positive(raw: &str) -> Result<Self, ValidationError> {
        let money = Money::parse(raw)?;
        if !money.is_positive() {
            return Err(ValidationError::MustBePositive);
        }
        Ok(money)
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > decimal::zero()
    }

    /// Direction of an offer relative to the listed amount.
    pub fn compare_to(&self, listed: &Money) -> Ordering {
        self.0.cmp(&listed.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = DecimalInput::deserialize(deserializer)?.into_raw();
        Money::parse(&raw).map_err(serde::de::Error::custom)
    }
}
