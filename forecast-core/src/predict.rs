//! Feels-like prediction from the joined table.
//!
//! Rows before "now" train an OLS model on
//! (epoch seconds, temperature, humidity, precipitation, wind); rows at or
//! after "now" are predicted and paired with the upstream apparent temperature.

use chrono::NaiveDateTime;

use crate::{
    error::ForecastError,
    model::{AugmentedRow, AugmentedSnapshot, Observation, PredictionPoint, PredictionSeries},
    regression::{LinearRegression, RegressionError},
};

/// Index of the first row whose timestamp is at or after `now`.
pub fn cut_index(rows: &[AugmentedRow], now: NaiveDateTime) -> usize {
    rows.iter()
        .position(|r| r.time() >= now)
        .unwrap_or(rows.len())
}

/// Model inputs for one row, or `None` if any measurement is missing.
pub fn features(o: &Observation) -> Option<Vec<f64>> {
    Some(vec![
        o.time.and_utc().timestamp() as f64,
        o.temperature?,
        o.relative_humidity?,
        o.precipitation_probability?,
        o.wind_speed?,
    ])
}

pub fn predict_apparent_temperature(
    augmented: &AugmentedSnapshot,
    now: NaiveDateTime,
) -> Result<PredictionSeries, ForecastError> {
    let rows = &augmented.rows;
    let cut = cut_index(rows, now);
    let no_training = || ForecastError::InsufficientTrainingData {
        now: now.to_string(),
    };
    let no_evaluation = || ForecastError::InsufficientEvaluationData {
        now: now.to_string(),
    };

    if cut == 0 {
        return Err(no_training());
    }
    if cut == rows.len() {
        return Err(no_evaluation());
    }

    let (train_x, train_y): (Vec<Vec<f64>>, Vec<f64>) = rows[..cut]
        .iter()
        .filter_map(|r| Some((features(&r.observation)?, r.apparent_temperature?)))
        .unzip();

    let mut model = LinearRegression::new();
    model.fit(&train_x, &train_y).map_err(|e| match e {
        RegressionError::InsufficientData { .. } => no_training(),
        other => other.into(),
    })?;

    let points = rows[cut..]
        .iter()
        .filter_map(|r| {
            let x = features(&r.observation)?;
            Some(model.predict_row(&x).map(|predicted| PredictionPoint {
                time: r.time(),
                actual: r.apparent_temperature,
                predicted,
            }))
        })
        .collect::<Result<Vec<_>, RegressionError>>()?;

    if points.is_empty() {
        return Err(no_evaluation());
    }
    let skipped = (rows.len() - cut) - points.len();

    tracing::info!(
        city = %augmented.city,
        training = train_y.len(),
        predicted = points.len(),
        skipped,
        r_squared = model.r_squared(),
        "fitted feels-like model"
    );

    Ok(PredictionSeries {
        city: augmented.city,
        now,
        cut_index: cut,
        training_rows: train_y.len(),
        r_squared: model.r_squared(),
        skipped,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        city::City,
        model::parse_timestamp,
        testing::observation,
    };
    use chrono::Duration;

    /// Hourly rows from 2023-03-10T00:00 where feels-like = temperature - 2.
    fn augmented(n: usize) -> AugmentedSnapshot {
        let start = parse_timestamp("2023-03-10T00:00").unwrap();
        let rows = (0..n)
            .map(|i| {
                let temp = 5.0 + (i as f64 * 0.9).sin() * 4.0 + i as f64 * 0.1;
                let mut o = observation("2023-03-10T00:00", temp);
                o.time = start + Duration::hours(i as i64);
                o.relative_humidity = Some(60.0 + (i % 5) as f64);
                AugmentedRow {
                    observation: o,
                    apparent_temperature: Some(temp - 2.0),
                }
            })
            .collect();
        AugmentedSnapshot {
            city: City::London,
            rows,
        }
    }

    fn t(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn cut_partitions_strictly_around_now() {
        let table = augmented(10);
        let now = t("2023-03-10T04:30");
        let cut = cut_index(&table.rows, now);

        assert_eq!(cut, 5);
        assert!(table.rows[..cut].iter().all(|r| r.time() < now));
        assert!(table.rows[cut..].iter().all(|r| r.time() >= now));
    }

    #[test]
    fn row_exactly_at_now_is_evaluated() {
        let table = augmented(10);
        assert_eq!(cut_index(&table.rows, t("2023-03-10T04:00")), 4);
    }

    #[test]
    fn prediction_aligns_with_evaluation_rows() {
        let table = augmented(24);
        let series = predict_apparent_temperature(&table, t("2023-03-10T12:00")).unwrap();

        assert_eq!(series.cut_index, 12);
        assert_eq!(series.training_rows, 12);
        assert_eq!(series.points.len(), 12);
        assert_eq!(series.points[0].time, t("2023-03-10T12:00"));
        for p in &series.points {
            let actual = p.actual.unwrap();
            assert!((p.predicted - actual).abs() < 1e-6, "{p:?}");
        }
    }

    #[test]
    fn now_before_first_row_has_no_training_data() {
        let table = augmented(5);
        let err = predict_apparent_temperature(&table, t("2023-03-10T00:00")).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientTrainingData { .. }));
    }

    #[test]
    fn now_after_last_row_has_no_evaluation_data() {
        let table = augmented(5);
        let err = predict_apparent_temperature(&table, t("2023-03-10T04:01")).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientEvaluationData { .. }));
    }

    #[test]
    fn rows_with_missing_values_are_left_out_of_training() {
        let mut table = augmented(10);
        table.rows[0].apparent_temperature = None;
        table.rows[1].observation.precipitation_probability = None;

        let series = predict_apparent_temperature(&table, t("2023-03-10T05:00")).unwrap();
        assert_eq!(series.training_rows, 3);
        assert_eq!(series.points.len(), 5);
        assert_eq!(series.skipped, 0);
    }

    #[test]
    fn evaluation_rows_with_missing_features_are_counted_as_skipped() {
        let mut table = augmented(10);
        table.rows[7].observation.wind_speed = None;

        let series = predict_apparent_temperature(&table, t("2023-03-10T05:00")).unwrap();
        assert_eq!(series.points.len(), 4);
        assert_eq!(series.skipped, 1);
        assert!(series.points.iter().all(|p| p.time != t("2023-03-10T07:00")));
    }

    #[test]
    fn training_rows_all_incomplete_is_insufficient() {
        let mut table = augmented(4);
        for row in &mut table.rows[..2] {
            row.apparent_temperature = None;
        }
        let err = predict_apparent_temperature(&table, t("2023-03-10T02:00")).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientTrainingData { .. }));
    }
}
