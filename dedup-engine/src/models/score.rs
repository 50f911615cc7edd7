//! Similarity score with two-decimal precision
//!
//! Scores are percentages in `0.00..=100.00`. They are held as integer
//! hundredths so that threshold comparisons and descending sorts are exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Percentage score stored as hundredths (`9050` = `90.50`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(u16);

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(10_000);

    /// Build from hundredths; `None` outside `0..=10000`
    pub fn from_hundredths(hundredths: i64) -> Option<Score> {
        if (0..=i64::from(Self::MAX.0)).contains(&hundredths) {
            Some(Score(hundredths as u16))
        } else {
            None
        }
    }

    /// Build from a percentage, rounding to two decimals; `None` if NaN or out of range
    pub fn from_percent(percent: f64) -> Option<Score> {
        if !percent.is_finite() {
            return None;
        }
        let hundredths = (percent * 100.0).round();
        if hundredths < 0.0 || hundredths > f64::from(Self::MAX.0) {
            return None;
        }
        Some(Score(hundredths as u16))
    }

    /// Whole-number percentage, for tests and fixtures
    pub const fn whole(percent: u8) -> Score {
        let percent = if percent > 100 { 100 } else { percent };
        Score(percent as u16 * 100)
    }

    pub fn hundredths(&self) -> u16 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Inclusive lower-bound check
    pub fn meets(&self, threshold: Score) -> bool {
        *self >= threshold
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Score {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let percent: f64 = s
            .trim()
            .parse()
            .map_err(|e| format!("Invalid score '{}': {}", s, e))?;
        Score::from_percent(percent).ok_or_else(|| format!("Score {} outside 0..=100", s))
    }
}

impl TryFrom<f64> for Score {
    type Error = String;

    fn try_from(percent: f64) -> Result<Self, Self::Error> {
        Score::from_percent(percent).ok_or_else(|| format!("Score {} outside 0..=100", percent))
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.as_percent()
    }
}
