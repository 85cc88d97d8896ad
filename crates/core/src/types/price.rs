//! Type-safe price representation using decimal arithmetic.
//!
//! The backend reports prices as JSON numbers in the store's currency. They
//! are held as [`Decimal`] so percentage deltas over a price history are exact.

use core::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`] from user input.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The input is not a decimal number.
    #[error("price must be a number: {0}")]
    NotANumber(String),
    /// The amount is zero or negative where a positive amount is required.
    #[error("price must be greater than zero")]
    NotPositive,
}

/// A monetary amount in the store's currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price from a decimal amount.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create a price that must be strictly positive (e.g. an alert target).
    ///
    /// # Errors
    ///
    /// Returns `PriceError::NotPositive` if `amount <= 0`.
    pub fn positive(amount: Decimal) -> Result<Self, PriceError> {
        if amount > Decimal::ZERO {
            Ok(Self(amount))
        } else {
            Err(PriceError::NotPositive)
        }
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(self) -> Decimal {
        self.0
    }

    /// Whether the amount is strictly greater than zero.
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self)
            .map_err(|_| PriceError::NotANumber(s.to_owned()))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_rejects_zero_and_negative() {
        assert_eq!(Price::positive(Decimal::ZERO), Err(PriceError::NotPositive));
        assert_eq!(Price::positive(Decimal::new(-1, 0)), Err(PriceError::NotPositive));
        assert!(Price::positive(Decimal::new(1, 2)).is_ok());
    }

    #[test]
    fn test_from_str() {
        let price: Price = "19.99".parse().unwrap();
        assert_eq!(price.amount(), Decimal::new(1999, 2));
        assert!(matches!("abc".parse::<Price>(), Err(PriceError::NotANumber(_))));
    }

    #[test]
    fn test_deserializes_json_numbers() {
        let price: Price = serde_json::from_str("1299.5").unwrap();
        assert_eq!(price.amount(), Decimal::new(12995, 1));

        let price: Price = serde_json::from_str("42").unwrap();
        assert_eq!(price.amount(), Decimal::new(42, 0));
    }

    #[test]
    fn test_display_two_places() {
        assert_eq!(Price::new(Decimal::new(5, 0)).to_string(), "5.00");
    }
}
