//! Exact-decimal money type for bid amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point
//! errors). All amounts carry exactly two fractional digits; construction
//! rounds HALF_UP and comparisons are exact.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A monetary amount with fixed two-decimal precision
///
/// Must never be negative. Serialized as a string ("105.00") to prevent
/// JSON number precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    /// Zero amount (used for displaced-bid defaults)
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create a new Money value, rounding to two decimal places HALF_UP
    ///
    /// # Panics
    /// Panics if the amount is negative
    pub fn new(value: Decimal) -> Self {
        assert!(value >= Decimal::ZERO, "Money must not be negative");
        Self(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Try to create a Money value, returning None if negative
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ZERO {
            Some(Self(
                value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            ))
        } else {
            None
        }
    }

    /// Create from whole units (for testing/convenience)
    pub fn from_u64(value: u64) -> Self {
        Self::new(Decimal::from(value))
    }

    /// Create from integer cents
    pub fn from_cents(cents: i64) -> Self {
        Self::new(Decimal::new(cents, 2))
    }

    /// Create from string
    pub fn from_str(s: &str) -> Result<Self, rust_decimal::Error> {
        let decimal = Decimal::from_str(s)?;
        Ok(Self::new(decimal))
    }

    /// Get the inner decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Amount in integer cents (exact, since scale is 2)
    pub fn cents(&self) -> i64 {
        (self.0 * Decimal::from(100)).to_i64().unwrap_or(i64::MAX)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    /// Check if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

// Arithmetic operations
impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        assert!(self.0 >= rhs.0, "Money subtraction would result in negative");
        Self(self.0 - rhs.0)
    }
}

// Custom serialization to preserve precision
impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{:.2}", self.0))
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Decimal's visitor accepts both JSON numbers and strings
        let decimal = <Decimal as Deserialize>::deserialize(deserializer)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("Money must not be negative"))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
