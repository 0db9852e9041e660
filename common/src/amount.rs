//! Fixed-point amounts.
//!
//! Every amount that flows through matching and settlement is held at
//! [`AMOUNT_SCALE`] decimal places, rounded half-up. Reporting uses
//! [`REPORT_SCALE`] places with the same rule.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use crate::error::SwapError;

/// Decimal places used for matching and settlement.
pub const AMOUNT_SCALE: u32 = 4;

/// Decimal places used for external reporting.
pub const REPORT_SCALE: u32 = 2;

/// A non-negative quantity of some asset at fixed scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Round a decimal half-up to the matching scale.
    pub fn round(value: Decimal) -> Decimal {
        value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Build from a decimal, rounding to the matching scale.
    pub fn from_decimal(value: Decimal) -> Result<Self, SwapError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(SwapError::validation(
                format!("Amount must not be negative: {value}"),
                "amount",
            ));
        }
        let mut rounded = Self::round(value);
        rounded.rescale(AMOUNT_SCALE);
        Ok(Self(rounded))
    }

    /// Parse caller input. Malformed and negative input is rejected.
    pub fn parse(input: &str) -> Result<Self, SwapError> {
        let value = Decimal::from_str(input.trim()).map_err(|_| {
            SwapError::validation(format!("Amount is not a decimal: {input:?}"), "amount")
        })?;
        Self::from_decimal(value)
    }

    /// Whole units, for tests and bootstrap code.
    pub fn from_units(units: u64) -> Self {
        let mut value = Decimal::from(units);
        value.rescale(AMOUNT_SCALE);
        Self(value)
    }

    /// Underlying decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, returning `None` if the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            None
        } else {
            Some(Amount(self.0 - other.0))
        }
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        self.checked_sub(other).unwrap_or(Amount::ZERO)
    }

    /// Value rounded half-up to the reporting scale.
    pub fn to_report(&self) -> Decimal {
        let mut value = self
            .0
            .round_dp_with_strategy(REPORT_SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(REPORT_SCALE);
        value
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SwapError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_decimal(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
