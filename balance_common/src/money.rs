use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::{op, Rate};

/// Every shop on the platform settles in the same currency; ledger rows record it for the audit trail.
pub const DEFAULT_CURRENCY: &str = "CNY";

//--------------------------------------       Money         ---------------------------------------------------------
/// A signed amount of money, stored as a whole number of cents.
///
/// Marketplace payloads carry decimal amounts, which are converted exactly once at the boundary with
/// [`Money::from_major`]. All arithmetic from there on is integral.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as money: {0}")]
pub struct MoneyConversionError(String);

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Converts a decimal amount in major units (e.g. `12.34`) to cents, rounding half away from zero.
    pub fn from_major(amount: f64) -> Result<Self, MoneyConversionError> {
        if !amount.is_finite() {
            return Err(MoneyConversionError(format!("{amount} is not a finite number")));
        }
        let cents = (amount * 100.0).round();
        if cents.abs() > i64::MAX as f64 {
            return Err(MoneyConversionError(format!("{amount} is out of range")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self(cents as i64))
    }

    /// Lossy variant of [`Money::from_major`] for wire payloads, where a non-finite value is treated as zero.
    pub fn from_major_lossy(amount: f64) -> Self {
        Self::from_major(amount).unwrap_or_default()
    }

    pub fn as_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// The portion of this amount given by `rate`, rounded half away from zero to the nearest cent.
    pub fn share(&self, rate: Rate) -> Self {
        let num = i128::from(self.0) * i128::from(rate.bps());
        let den = i128::from(Rate::ONE_HUNDRED_PERCENT.bps());
        let q = num / den;
        let r = num % den;
        let adj = if 2 * r.abs() >= den { num.signum() } else { 0 };
        #[allow(clippy::cast_possible_truncation)]
        Self((q + adj) as i64)
    }
}
