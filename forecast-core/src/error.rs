//! Error types shared by every stage of the forecast pipeline.

use thiserror::Error;

use crate::regression::RegressionError;

/// Failures of the fetch / store / reconcile / predict pipeline.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Upstream weather source unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Upstream returned an empty time range for {city}")]
    EmptyTimeRange { city: String },

    #[error("Length mismatch in '{field}': expected {expected} values, found {found}")]
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("Schema mismatch in table '{table}': expected columns [{expected}], found [{found}]")]
    SchemaMismatch {
        table: String,
        expected: String,
        found: String,
    },

    #[error("Cannot merge a {incoming} snapshot into a {base} snapshot")]
    CityMismatch { base: String, incoming: String },

    #[error("No overlapping timestamps between the snapshot and the '{covariate}' series")]
    EmptyJoin { covariate: String },

    #[error("No training rows before {now}")]
    InsufficientTrainingData { now: String },

    #[error("No evaluation rows at or after {now}")]
    InsufficientEvaluationData { now: String },

    #[error("No snapshot has been stored yet")]
    NoSnapshotAvailable,

    #[error("Unknown city '{0}'. Supported cities: Paris, Brussels, London, Lisbon, Athens.")]
    UnknownCity(String),

    #[error(
        "Unknown field '{0}'. Supported fields: temperature, relative humidity, precipitation, wind speed."
    )]
    UnknownField(String),

    #[error("No stored snapshot {generation} for {city}")]
    UnknownSnapshot { city: String, generation: u32 },

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chart output error: {0}")]
    Chart(String),

    #[error("Feels-like model failed: {0}")]
    Regression(#[from] RegressionError),

    #[error("Storage task did not complete: {0}")]
    StorageTask(#[from] tokio::task::JoinError),
}

impl ForecastError {
    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ForecastError::UpstreamUnavailable(_) => {
                "The weather service could not be reached. Please try again later."
            }
            ForecastError::MalformedResponse(_) | ForecastError::EmptyTimeRange { .. } => {
                "The weather service returned unexpected data."
            }
            ForecastError::LengthMismatch { .. } => {
                "The forecast data was inconsistent after timezone correction."
            }
            ForecastError::SchemaMismatch { .. }
            | ForecastError::Storage(_)
            | ForecastError::StorageTask(_)
            | ForecastError::UnknownSnapshot { .. }
            | ForecastError::InvalidTableName(_) => "Stored forecast data could not be read.",
            ForecastError::CityMismatch { .. } => "Forecasts of different cities cannot be merged.",
            ForecastError::EmptyJoin { .. } => "No overlapping data is available for a prediction.",
            ForecastError::InsufficientTrainingData { .. } => {
                "Not enough past data to train the feels-like model."
            }
            ForecastError::InsufficientEvaluationData { .. } => {
                "No future data left to predict. Fetch a fresh forecast first."
            }
            ForecastError::NoSnapshotAvailable => "No forecast has been fetched yet.",
            ForecastError::UnknownCity(_) => "Unknown city.",
            ForecastError::UnknownField(_) => "Unknown forecast field.",
            ForecastError::Chart(_) => "The chart could not be written.",
            ForecastError::Regression(_) => "The feels-like model could not be fitted.",
            ForecastError::Io(_) => "A file operation failed. Please try again.",
        }
    }

    /// Whether a background refresh should simply try again on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForecastError::UpstreamUnavailable(_)
                | ForecastError::MalformedResponse(_)
                | ForecastError::EmptyTimeRange { .. }
                | ForecastError::NoSnapshotAvailable
        )
    }
}

impl From<reqwest::Error> for ForecastError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForecastError::UpstreamUnavailable(format!("request timed out: {e}"))
        } else if e.is_decode() {
            ForecastError::MalformedResponse(e.to_string())
        } else {
            ForecastError::UpstreamUnavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_non_empty() {
        let errors = [
            ForecastError::UpstreamUnavailable("x".into()),
            ForecastError::EmptyJoin {
                covariate: "apparent_temperature".into(),
            },
            ForecastError::NoSnapshotAvailable,
            ForecastError::InsufficientTrainingData { now: "t".into() },
        ];

        for err in errors {
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn upstream_failures_are_transient() {
        assert!(ForecastError::UpstreamUnavailable("timeout".into()).is_transient());
        assert!(ForecastError::NoSnapshotAvailable.is_transient());
        assert!(!ForecastError::CityMismatch {
            base: "Paris".into(),
            incoming: "London".into()
        }
        .is_transient());
    }

    #[test]
    fn regression_failures_keep_their_own_kind() {
        let err = ForecastError::from(RegressionError::Singular);
        assert!(matches!(
            err,
            ForecastError::Regression(RegressionError::Singular)
        ));
        assert!(!err.is_transient());
        assert_eq!(err.user_message(), "The feels-like model could not be fitted.");
    }

    #[test]
    fn length_mismatch_message_names_field() {
        let err = ForecastError::LengthMismatch {
            field: "windspeed_10m".into(),
            expected: 70,
            found: 69,
        };
        assert!(err.to_string().contains("windspeed_10m"));
    }
}
