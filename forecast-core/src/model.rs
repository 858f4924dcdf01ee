use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{city::City, error::ForecastError};

/// Format of the local timestamps sent by the upstream API and persisted in the store.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Name of the key column shared by every table.
pub const TIME_COLUMN: &str = "time";

/// Upstream name of the "feels-like" covariate.
pub const APPARENT_TEMPERATURE: &str = "apparent_temperature";

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, ForecastError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|e| ForecastError::MalformedResponse(format!("invalid timestamp '{value}': {e}")))
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

/// One of the four measured forecast columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    RelativeHumidity,
    PrecipitationProbability,
    WindSpeed,
}

impl Field {
    pub const fn all() -> &'static [Field] {
        &[
            Field::Temperature,
            Field::RelativeHumidity,
            Field::PrecipitationProbability,
            Field::WindSpeed,
        ]
    }

    /// Column name used upstream and in the persisted tables.
    pub fn column(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature_2m",
            Field::RelativeHumidity => "relativehumidity_2m",
            Field::PrecipitationProbability => "precipitation_probability",
            Field::WindSpeed => "windspeed_10m",
        }
    }

    /// Human label, as typed by users.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::RelativeHumidity => "relative humidity",
            Field::PrecipitationProbability => "precipitation",
            Field::WindSpeed => "wind speed",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Field::Temperature => "°C",
            Field::RelativeHumidity | Field::PrecipitationProbability => "%",
            Field::WindSpeed => "km/h",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<&str> for Field {
    type Error = ForecastError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let wanted = value.trim().to_lowercase().replace(['-', '_'], " ");
        Field::all()
            .iter()
            .copied()
            .find(|f| f.label() == wanted || f.column().replace('_', " ") == wanted)
            .ok_or_else(|| ForecastError::UnknownField(value.to_string()))
    }
}

impl std::str::FromStr for Field {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::try_from(s)
    }
}

/// One hourly forecast row. Measurements are `None` when upstream sent `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub time: NaiveDateTime,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub precipitation_probability: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl Observation {
    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::RelativeHumidity => self.relative_humidity,
            Field::PrecipitationProbability => self.precipitation_probability,
            Field::WindSpeed => self.wind_speed,
        }
    }
}

/// A city's full forecast table: strictly increasing, duplicate-free timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    city: City,
    observations: Vec<Observation>,
}

impl Snapshot {
    /// Build a snapshot, rejecting rows that are not strictly increasing in time.
    pub fn new(city: City, observations: Vec<Observation>) -> Result<Self, ForecastError> {
        if let Some(pair) = observations.windows(2).find(|w| w[0].time >= w[1].time) {
            return Err(ForecastError::MalformedResponse(format!(
                "timestamps for {city} are not strictly increasing ({} followed by {})",
                format_timestamp(&pair[0].time),
                format_timestamp(&pair[1].time),
            )));
        }
        Ok(Self { city, observations })
    }

    /// Caller guarantees the ordering invariant.
    pub(crate) fn from_ordered(city: City, observations: Vec<Observation>) -> Self {
        debug_assert!(observations.windows(2).all(|w| w[0].time < w[1].time));
        Self { city, observations }
    }

    pub fn city(&self) -> City {
        self.city
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.observations.first().map(|o| o.time)
    }

    /// The (time, value) column for one field.
    pub fn column(&self, field: Field) -> Vec<(NaiveDateTime, Option<f64>)> {
        self.observations.iter().map(|o| (o.time, o.value(field))).collect()
    }
}

/// A single covariate column keyed by time, as fetched (not persisted as a snapshot).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovariateSeries {
    pub city: City,
    pub column: String,
    pub points: Vec<(NaiveDateTime, Option<f64>)>,
}

impl CovariateSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedRow {
    pub observation: Observation,
    pub apparent_temperature: Option<f64>,
}

impl AugmentedRow {
    pub fn time(&self) -> NaiveDateTime {
        self.observation.time
    }
}

/// A snapshot inner-joined with the apparent temperature covariate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedSnapshot {
    pub city: City,
    pub rows: Vec<AugmentedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionPoint {
    pub time: NaiveDateTime,
    pub actual: Option<f64>,
    pub predicted: f64,
}

/// Actual vs. predicted apparent temperature from the cut onward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSeries {
    pub city: City,
    pub now: NaiveDateTime,
    pub cut_index: usize,
    pub training_rows: usize,
    pub r_squared: f64,
    /// Evaluation rows left out because a feature was missing.
    pub skipped: usize,
    pub points: Vec<PredictionPoint>,
}

/// Non-fatal inconsistencies found while normalizing a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchWarning {
    /// A value column did not line up with the time column after the timezone shift.
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for FetchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchWarning::LengthMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "'{field}' has {found} values for {expected} timestamps; truncated to the shorter"
            ),
        }
    }
}

impl From<FetchWarning> for ForecastError {
    fn from(w: FetchWarning) -> Self {
        match w {
            FetchWarning::LengthMismatch {
                field,
                expected,
                found,
            } => ForecastError::LengthMismatch {
                field,
                expected,
                found,
            },
        }
    }
}

/// A fetched value together with the warnings raised while producing it.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub warnings: Vec<FetchWarning>,
}
