//! Chart descriptions handed to a rendering collaborator.
//!
//! The pipeline only decides what is drawn; `ChartRenderer` implementations
//! decide how. `JsonChartRenderer` stores the description as JSON for a front
//! end to draw.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;

use crate::{
    city::City,
    error::ForecastError,
    model::{Field, PredictionSeries},
};

/// Rows shown before the cut, so the chart starts a few hours in the past.
pub const RECENT_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStyle {
    Line,
    LineWithMarkers,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: NaiveDateTime,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    #[serde(rename(serialize = "type"))]
    pub style: SeriesStyle,
    pub data: Vec<ChartPoint>,
}

impl ChartSeries {
    /// Build a series from optional values, skipping gaps.
    pub fn from_values<I>(name: &str, style: SeriesStyle, values: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, Option<f64>)>,
    {
        Self {
            name: name.to_string(),
            style,
            data: values
                .into_iter()
                .filter_map(|(x, y)| Some(ChartPoint { x, y: y? }))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    /// Used as the output file stem.
    pub name: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
    /// Vertical "now" marker.
    pub now: Option<NaiveDateTime>,
}

/// Rendering collaborator: stores a chart and returns where it went.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, chart: &Chart) -> Result<PathBuf, ForecastError>;
}

/// Writes charts as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonChartRenderer {
    dir: PathBuf,
}

impl JsonChartRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ChartRenderer for JsonChartRenderer {
    fn render(&self, chart: &Chart) -> Result<PathBuf, ForecastError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", chart.name));
        let json = serde_json::to_string_pretty(chart)
            .map_err(|e| ForecastError::Chart(e.to_string()))?;
        std::fs::write(&path, json)?;

        tracing::info!(path = %path.display(), "chart written");
        Ok(path)
    }
}

/// Renderer that keeps nothing; for callers that only want the data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRenderer;

impl ChartRenderer for NoopRenderer {
    fn render(&self, chart: &Chart) -> Result<PathBuf, ForecastError> {
        Ok(PathBuf::from(&chart.name))
    }
}

fn x_label(city: City) -> String {
    format!("{city} (local time)")
}

/// First index to show: a few rows before the first row at or after `now`.
pub fn window_start(times: &[NaiveDateTime], now: NaiveDateTime) -> usize {
    let cut = times.iter().position(|t| *t >= now).unwrap_or(times.len());
    cut.saturating_sub(RECENT_ROWS)
}

/// Chart of one forecast field from shortly before `now` onward.
pub fn forecast_chart(
    city: City,
    field: Field,
    column: &[(NaiveDateTime, Option<f64>)],
    now: NaiveDateTime,
) -> Chart {
    let times: Vec<_> = column.iter().map(|(t, _)| *t).collect();
    let start = window_start(&times, now);

    Chart {
        name: "weather_forecast".to_string(),
        title: city.to_string(),
        x_label: x_label(city),
        y_label: format!("{} ({})", field.label(), field.unit()),
        series: vec![ChartSeries::from_values(
            field.label(),
            SeriesStyle::Line,
            column[start..].iter().copied(),
        )],
        now: None,
    }
}

/// Temperature, actual feels-like and predicted feels-like, with a "now" marker.
pub fn feels_like_chart(
    temperature: &[(NaiveDateTime, Option<f64>)],
    apparent: &[(NaiveDateTime, Option<f64>)],
    prediction: &PredictionSeries,
) -> Chart {
    let city = prediction.city;
    let start = prediction.cut_index.saturating_sub(RECENT_ROWS);
    let from = |s: &[(NaiveDateTime, Option<f64>)]| s.get(start..).unwrap_or_default().to_vec();

    Chart {
        name: "weather_forecast_feels_like".to_string(),
        title: city.to_string(),
        x_label: x_label(city),
        y_label: format!("temperature ({})", Field::Temperature.unit()),
        series: vec![
            ChartSeries::from_values("temperature", SeriesStyle::LineWithMarkers, from(temperature)),
            ChartSeries::from_values("real feel", SeriesStyle::LineWithMarkers, from(apparent)),
            ChartSeries::from_values(
                "real feel ML prediction",
                SeriesStyle::Line,
                prediction.points.iter().map(|p| (p.time, Some(p.predicted))),
            ),
        ],
        now: prediction.points.first().map(|p| p.time),
    }
}
