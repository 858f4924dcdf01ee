//! Acquisition of per-city hourly series.
//!
//! Upstream labels are GMT. For a city `k` hours ahead, the first `k` labels are
//! dropped from the time column and the last `k` entries from every value
//! column, which relabels each value with the city's wall-clock hour.

use chrono::NaiveDateTime;
use std::sync::Arc;

use crate::{
    city::City,
    config::WindowConfig,
    error::ForecastError,
    model::{
        APPARENT_TEMPERATURE, CovariateSeries, FetchWarning, Fetched, Field, Observation, Snapshot,
        parse_timestamp,
    },
    provider::{HourlyQuery, HourlySource, RawHourly},
};

/// Fahrenheit to Celsius, rounded to two decimals.
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    ((f - 32.0) / 1.8 * 100.0).round() / 100.0
}

/// Time labels with the first `offset` entries removed.
pub fn shift_labels<T: Clone>(labels: &[T], offset: usize) -> Vec<T> {
    labels.get(offset..).unwrap_or_default().to_vec()
}

/// Values with the last `offset` entries removed.
pub fn shift_values<T: Clone>(values: &[T], offset: usize) -> Vec<T> {
    values[..values.len().saturating_sub(offset)].to_vec()
}

/// Time column plus value columns, all of equal length, in request order.
struct Aligned {
    times: Vec<NaiveDateTime>,
    columns: Vec<Vec<Option<f64>>>,
    warnings: Vec<FetchWarning>,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesFetcher {
    source: Arc<dyn HourlySource>,
    window: WindowConfig,
    strict_lengths: bool,
}

impl TimeSeriesFetcher {
    pub fn new(source: Arc<dyn HourlySource>, window: WindowConfig) -> Self {
        Self {
            source,
            window,
            strict_lengths: false,
        }
    }

    /// Fail with `LengthMismatch` instead of truncating to the shortest column.
    pub fn with_strict_lengths(mut self, strict: bool) -> Self {
        self.strict_lengths = strict;
        self
    }

    /// Fetch the four primary fields for `city` and convert them to a snapshot.
    pub async fn fetch_snapshot(&self, city: City) -> Result<Fetched<Snapshot>, ForecastError> {
        let columns: Vec<&str> = Field::all().iter().map(Field::column).collect();
        let query = HourlyQuery::for_city(
            city,
            &columns,
            self.window.past_days,
            self.window.forecast_days,
        )
        .in_fahrenheit();

        let raw = self.source.fetch_hourly(&query).await?;
        let Aligned {
            times,
            columns,
            warnings,
        } = self.align(city, &raw, &columns)?;

        let observations = times
            .into_iter()
            .enumerate()
            .map(|(i, time)| Observation {
                time,
                temperature: columns[0][i].map(fahrenheit_to_celsius),
                relative_humidity: columns[1][i],
                precipitation_probability: columns[2][i],
                wind_speed: columns[3][i],
            })
            .collect();

        let snapshot = Snapshot::new(city, observations)?;
        tracing::info!(%city, rows = snapshot.len(), warnings = warnings.len(), "fetched forecast");

        Ok(Fetched {
            value: snapshot,
            warnings,
        })
    }

    /// Fetch a single covariate column (already in Celsius upstream, no conversion).
    pub async fn fetch_covariate(
        &self,
        city: City,
        column: &str,
    ) -> Result<Fetched<CovariateSeries>, ForecastError> {
        let query = HourlyQuery::for_city(
            city,
            &[column],
            self.window.covariate_past_days,
            self.window.covariate_forecast_days,
        );

        let raw = self.source.fetch_hourly(&query).await?;
        let Aligned {
            times,
            mut columns,
            warnings,
        } = self.align(city, &raw, &[column])?;

        let values = columns.pop().unwrap_or_default();
        let points = times.into_iter().zip(values).collect();

        tracing::info!(%city, column, "fetched covariate");
        Ok(Fetched {
            value: CovariateSeries {
                city,
                column: column.to_string(),
                points,
            },
            warnings,
        })
    }

    pub async fn fetch_apparent_temperature(
        &self,
        city: City,
    ) -> Result<Fetched<CovariateSeries>, ForecastError> {
        self.fetch_covariate(city, APPARENT_TEMPERATURE).await
    }

    fn align(&self, city: City, raw: &RawHourly, names: &[&str]) -> Result<Aligned, ForecastError> {
        if raw.time.is_empty() {
            return Err(ForecastError::EmptyTimeRange {
                city: city.to_string(),
            });
        }

        let offset = city.utc_offset_hours();
        let times = shift_labels(&raw.time, offset)
            .iter()
            .map(|t| parse_timestamp(t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = Vec::with_capacity(names.len());
        let mut warnings = Vec::new();
        for name in names {
            let values = shift_values(raw.column(name)?, offset);
            if values.len() != times.len() {
                let warning = FetchWarning::LengthMismatch {
                    field: name.to_string(),
                    expected: times.len(),
                    found: values.len(),
                };
                if self.strict_lengths {
                    return Err(warning.into());
                }
                tracing::warn!(%city, "{warning}");
                warnings.push(warning);
            }
            columns.push(values);
        }

        let len = columns.iter().map(Vec::len).fold(times.len(), usize::min);
        if len == 0 {
            return Err(ForecastError::EmptyTimeRange {
                city: city.to_string(),
            });
        }

        let mut times = times;
        times.truncate(len);
        for column in &mut columns {
            column.truncate(len);
        }

        Ok(Aligned {
            times,
            columns,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSource, hourly};

    fn primary(n: usize, temps_f: Vec<f64>) -> RawHourly {
        hourly(
            "2023-03-10T00:00",
            n,
            &[
                ("temperature_2m", temps_f),
                ("relativehumidity_2m", vec![80.0; n]),
                ("precipitation_probability", vec![10.0; n]),
                ("windspeed_10m", vec![12.5; n]),
            ],
        )
    }

    fn fetcher(source: ScriptedSource) -> TimeSeriesFetcher {
        TimeSeriesFetcher::new(Arc::new(source), WindowConfig::default())
    }

    #[test]
    fn conversion_rounds_to_two_decimals() {
        assert_eq!(fahrenheit_to_celsius(32.0), 0.0);
        assert_eq!(fahrenheit_to_celsius(212.0), 100.0);
        assert_eq!(fahrenheit_to_celsius(70.0), 21.11);
        assert_eq!(fahrenheit_to_celsius(-40.0), -40.0);
    }

    #[test]
    fn shifting_drops_head_labels_and_tail_values() {
        let labels = [0, 1, 2, 3, 4];
        let values = ['a', 'b', 'c', 'd', 'e'];
        assert_eq!(shift_labels(&labels, 2), vec![2, 3, 4]);
        assert_eq!(shift_values(&values, 2), vec!['a', 'b', 'c']);
        assert!(shift_labels(&labels, 9).is_empty());
        assert!(shift_values(&values, 9).is_empty());
    }

    #[tokio::test]
    async fn zero_offset_city_keeps_every_row() {
        let temps: Vec<f64> = (0..10).map(|i| 32.0 + 9.0 * i as f64).collect();
        let source = ScriptedSource::new().respond("temperature_2m", primary(10, temps));

        let fetched = fetcher(source).fetch_snapshot(City::London).await.unwrap();
        let snapshot = fetched.value;

        assert_eq!(snapshot.len(), 10);
        assert!(fetched.warnings.is_empty());
        let celsius: Vec<f64> = snapshot
            .observations()
            .iter()
            .map(|o| o.temperature.unwrap())
            .collect();
        assert_eq!(&celsius[..4], &[0.0, 5.0, 10.0, 15.0]);
        assert_eq!(celsius[9], 45.0);
    }

    #[tokio::test]
    async fn offset_city_is_truncated_by_offset() {
        let raw = primary(48, (0..48).map(|i| 50.0 + i as f64).collect());
        let raw_times = raw.time.clone();
        let source = ScriptedSource::new().respond("temperature_2m", raw);

        let snapshot = fetcher(source)
            .fetch_snapshot(City::Athens)
            .await
            .unwrap()
            .value;

        assert_eq!(snapshot.len(), 48 - 2);
        assert_eq!(
            snapshot.first_time().unwrap(),
            parse_timestamp(&raw_times[2]).unwrap()
        );
        // first retained value is the first upstream value, relabelled two hours later
        assert_eq!(
            snapshot.observations()[0].temperature,
            Some(fahrenheit_to_celsius(50.0))
        );
    }

    #[tokio::test]
    async fn primary_fetch_asks_for_fahrenheit_and_configured_window() {
        let source = ScriptedSource::new().respond("temperature_2m", primary(5, vec![40.0; 5]));
        let calls = source.calls();
        fetcher(source).fetch_snapshot(City::Paris).await.unwrap();

        let query = calls.lock()[0].clone();
        assert!(query.fahrenheit);
        assert_eq!(query.past_days, 3);
        assert_eq!(query.fields.len(), 4);
    }

    #[tokio::test]
    async fn short_column_is_truncated_with_warning() {
        let mut raw = primary(6, vec![50.0; 6]);
        raw.columns.insert("windspeed_10m".into(), vec![Some(1.0); 5]);
        let source = ScriptedSource::new().respond("temperature_2m", raw);

        let fetched = fetcher(source).fetch_snapshot(City::London).await.unwrap();
        assert_eq!(fetched.value.len(), 5);
        assert_eq!(
            fetched.warnings,
            vec![FetchWarning::LengthMismatch {
                field: "windspeed_10m".into(),
                expected: 6,
                found: 5,
            }]
        );
    }

    #[tokio::test]
    async fn strict_mode_fails_on_length_mismatch() {
        let mut raw = primary(6, vec![50.0; 6]);
        raw.columns.insert("windspeed_10m".into(), vec![Some(1.0); 5]);
        let source = ScriptedSource::new().respond("temperature_2m", raw);

        let err = fetcher(source)
            .with_strict_lengths(true)
            .fetch_snapshot(City::London)
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::LengthMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_field_is_malformed() {
        let raw = hourly("2023-03-10T00:00", 3, &[("temperature_2m", vec![1.0; 3])]);
        let source = ScriptedSource::new().respond("temperature_2m", raw);

        let err = fetcher(source).fetch_snapshot(City::London).await.unwrap_err();
        assert!(matches!(err, ForecastError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn empty_time_range_is_reported() {
        let raw = primary(0, vec![]);
        let source = ScriptedSource::new().respond("temperature_2m", raw);

        let err = fetcher(source).fetch_snapshot(City::London).await.unwrap_err();
        assert!(matches!(err, ForecastError::EmptyTimeRange { .. }));
    }

    #[tokio::test]
    async fn covariate_is_shifted_but_not_converted() {
        let raw = hourly(
            "2023-03-10T00:00",
            4,
            &[(APPARENT_TEMPERATURE, vec![1.5, 2.5, 3.5, 4.5])],
        );
        let source = ScriptedSource::new().respond(APPARENT_TEMPERATURE, raw);
        let calls = source.calls();

        let series = fetcher(source)
            .fetch_apparent_temperature(City::Paris)
            .await
            .unwrap()
            .value;

        assert_eq!(series.len(), 3);
        assert_eq!(series.points[0].0, parse_timestamp("2023-03-10T01:00").unwrap());
        assert_eq!(series.points[0].1, Some(1.5));

        let query = calls.lock()[0].clone();
        assert!(!query.fahrenheit);
        assert_eq!(query.past_days, 7);
    }
}
