//! Age-based weight functions.
//!
//! The weight of a message decides how much evidence it contributes to the
//! per-recipient statistics. Only a closed set of decay functions is
//! supported; they are selected by name in the configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::LearnError;

/// Decay function mapping a message age (in days) to its weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightFormula {
    /// `1 / sqrt(age + 1)` (default).
    InverseSqrt,
    /// `1 / (age + 1)`.
    Inverse,
    /// `0.5 ^ (age / half_life_days)`.
    Exponential { half_life_days: f64 },
    /// Every message counts the same.
    Constant,
}

impl Default for WeightFormula {
    fn default() -> Self {
        Self::InverseSqrt
    }
}

impl WeightFormula {
    /// Weight of a message that is `age_days` old.
    ///
    /// Negative ages (dates in the future) are treated as zero.
    pub fn weight(&self, age_days: i64) -> f64 {
        let age = age_days.max(0) as f64;
        match self {
            Self::InverseSqrt => 1.0 / (age + 1.0).sqrt(),
            Self::Inverse => 1.0 / (age + 1.0),
            Self::Exponential { half_life_days } => 0.5f64.powf(age / half_life_days),
            Self::Constant => 1.0,
        }
    }
}

impl FromStr for WeightFormula {
    type Err = LearnError;

    /// Accepted forms: `inverse_sqrt`, `inverse`, `constant`,
    /// `exponential:<half-life in days>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n.trim(), Some(a.trim())),
            None => (s, None),
        };
        let invalid = || LearnError::InvalidWeightFormula(s.to_string());
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("inverse_sqrt", None) => Ok(Self::InverseSqrt),
            ("inverse", None) => Ok(Self::Inverse),
            ("constant", None) => Ok(Self::Constant),
            ("exponential", Some(a)) => {
                let half_life_days: f64 = a.parse().map_err(|_| invalid())?;
                if half_life_days.is_finite() && half_life_days > 0.0 {
                    Ok(Self::Exponential { half_life_days })
                } else {
                    Err(invalid())
                }
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for WeightFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InverseSqrt => write!(f, "inverse_sqrt"),
            Self::Inverse => write!(f, "inverse"),
            Self::Exponential { half_life_days } => write!(f, "exponential:{half_life_days}"),
            Self::Constant => write!(f, "constant"),
        }
    }
}
