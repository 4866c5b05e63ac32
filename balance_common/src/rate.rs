use std::fmt::Display;

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

/// A percentage, stored in basis points (1/100 of a percent). `Rate::from_bps(500)` is 5%.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Rate(i64);

#[derive(Debug, Clone, Error)]
#[error("Invalid rate: {0}")]
pub struct RateError(String);

impl Rate {
    pub const ZERO: Rate = Rate(0);
    pub const ONE_HUNDRED_PERCENT: Rate = Rate(10_000);

    pub const fn from_bps(bps: i64) -> Self {
        Self(bps)
    }

    pub fn from_percent(percent: f64) -> Result<Self, RateError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(RateError(format!("{percent} is not a percentage between 0 and 100")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self((percent * 100.0).round() as i64))
    }

    pub fn bps(&self) -> i64 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_valid(&self) -> bool {
        (0..=Self::ONE_HUNDRED_PERCENT.0).contains(&self.0)
    }
}

impl Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, (self.0 % 100).abs())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn percent_conversion() {
        assert_eq!(Rate::from_percent(5.0).unwrap(), Rate::from_bps(500));
        assert_eq!(Rate::from_percent(12.345).unwrap(), Rate::from_bps(1235));
        assert!(Rate::from_percent(101.0).is_err());
        assert!(Rate::from_percent(-1.0).is_err());
        assert_eq!(Rate::from_bps(4500).to_string(), "45.00%");
        assert_eq!(Rate::from_bps(1).to_string(), "0.01%");
    }
}
