use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug};

use crate::{city::City, error::ForecastError};

pub mod open_meteo;

pub use open_meteo::OpenMeteoSource;

/// What to ask the upstream source for.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub fields: Vec<String>,
    /// Request temperatures in Fahrenheit instead of the upstream default (Celsius).
    pub fahrenheit: bool,
    pub past_days: u32,
    pub forecast_days: u32,
}

impl HourlyQuery {
    pub fn for_city(city: City, fields: &[&str], past_days: u32, forecast_days: u32) -> Self {
        let (latitude, longitude) = city.coordinates();
        Self {
            latitude,
            longitude,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            fahrenheit: false,
            past_days,
            forecast_days,
        }
    }

    pub fn in_fahrenheit(mut self) -> Self {
        self.fahrenheit = true;
        self
    }
}

/// Hourly records exactly as the upstream returned them (GMT labels, raw units).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHourly {
    pub time: Vec<String>,
    pub columns: HashMap<String, Vec<Option<f64>>>,
}

impl RawHourly {
    /// The values of a requested column; absent columns are a malformed response.
    pub fn column(&self, name: &str) -> Result<&[Option<f64>], ForecastError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ForecastError::MalformedResponse(format!("missing hourly field '{name}'")))
    }
}

/// A source of hourly weather records.
#[async_trait]
pub trait HourlySource: Send + Sync + Debug {
    async fn fetch_hourly(&self, query: &HourlyQuery) -> Result<RawHourly, ForecastError>;
}
