use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use crate::error::ForecastError;

/// The fixed reference set of cities the pipeline knows about.
///
/// Upstream data arrives in GMT; the offset is the number of whole hours the
/// city's wall clock runs ahead of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum City {
    Paris,
    Brussels,
    London,
    Lisbon,
    Athens,
}

impl City {
    pub fn as_str(&self) -> &'static str {
        match self {
            City::Paris => "Paris",
            City::Brussels => "Brussels",
            City::London => "London",
            City::Lisbon => "Lisbon",
            City::Athens => "Athens",
        }
    }

    pub const fn all() -> &'static [City] {
        &[City::Paris, City::Brussels, City::London, City::Lisbon, City::Athens]
    }

    /// (latitude, longitude) as sent to the upstream API.
    pub fn coordinates(&self) -> (f64, f64) {
        match self {
            City::Paris => (48.85, 2.35),
            City::Brussels => (50.85, 4.35),
            City::London => (51.51, -0.13),
            City::Lisbon => (38.72, -9.13),
            City::Athens => (37.98, 23.73),
        }
    }

    pub fn utc_offset_hours(&self) -> usize {
        match self {
            City::Paris | City::Brussels => 1,
            City::London | City::Lisbon => 0,
            City::Athens => 2,
        }
    }

    /// Current wall-clock time in this city, truncated to the minute, in the
    /// same naive local clock as the stored timestamps.
    pub fn local_now(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        let local = utc.naive_utc() + Duration::hours(self.utc_offset_hours() as i64);
        local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local)
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for City {
    type Error = ForecastError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        City::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ForecastError::UnknownCity(value.to_string()))
    }
}

impl std::str::FromStr for City {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        City::try_from(s)
    }
}
