//! In-crate fakes shared by unit tests.

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

use crate::{
    city::City,
    error::ForecastError,
    model::{Observation, Snapshot, format_timestamp, parse_timestamp},
    provider::{HourlyQuery, HourlySource, RawHourly},
};

/// Answers each query with the response registered for its first field.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<String, Result<RawHourly, String>>>,
    calls: Arc<Mutex<Vec<HourlyQuery>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, first_field: &str, raw: RawHourly) -> Self {
        self.responses.lock().insert(first_field.to_string(), Ok(raw));
        self
    }

    pub fn fail(self, first_field: &str, message: &str) -> Self {
        self.responses
            .lock()
            .insert(first_field.to_string(), Err(message.to_string()));
        self
    }

    pub fn set(&self, first_field: &str, raw: RawHourly) {
        self.responses.lock().insert(first_field.to_string(), Ok(raw));
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<HourlyQuery>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl HourlySource for ScriptedSource {
    async fn fetch_hourly(&self, query: &HourlyQuery) -> Result<RawHourly, ForecastError> {
        self.calls.lock().push(query.clone());
        let key = query.fields.first().cloned().unwrap_or_default();
        match self.responses.lock().get(&key) {
            Some(Ok(raw)) => Ok(raw.clone()),
            Some(Err(msg)) => Err(ForecastError::UpstreamUnavailable(msg.clone())),
            None => Err(ForecastError::UpstreamUnavailable(format!("no response for {key}"))),
        }
    }
}

/// `n` hourly GMT labels starting at `start`, with the given columns.
pub fn hourly(start: &str, n: usize, columns: &[(&str, Vec<f64>)]) -> RawHourly {
    let start = parse_timestamp(start).expect("valid start");
    RawHourly {
        time: (0..n)
            .map(|i| format_timestamp(&(start + Duration::hours(i as i64))))
            .collect(),
        columns: columns
            .iter()
            .map(|(name, values)| (name.to_string(), values.iter().copied().map(Some).collect()))
            .collect(),
    }
}

pub fn observation(time: &str, temperature: f64) -> Observation {
    Observation {
        time: parse_timestamp(time).expect("valid time"),
        temperature: Some(temperature),
        relative_humidity: Some(70.0),
        precipitation_probability: Some(0.0),
        wind_speed: Some(10.0),
    }
}

/// Snapshot of `(time, temperature)` pairs with fixed other fields.
pub fn snapshot(city: City, rows: &[(&str, f64)]) -> Snapshot {
    Snapshot::new(
        city,
        rows.iter().map(|(t, v)| observation(t, *v)).collect(),
    )
    .expect("ordered rows")
}
