use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

use crate::{
    config::ApiConfig,
    error::ForecastError,
};

use super::{HourlyQuery, HourlySource, RawHourly};

/// Open-Meteo forecast endpoint. Hourly labels come back in GMT.
#[derive(Debug, Clone)]
pub struct OpenMeteoSource {
    base_url: String,
    http: Client,
}

impl OpenMeteoSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ForecastError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self, ForecastError> {
        Self::new(api.base_url.clone(), Duration::from_secs(api.timeout_secs))
    }

    fn query_params(query: &HourlyQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("latitude", query.latitude.to_string()),
            ("longitude", query.longitude.to_string()),
            ("hourly", query.fields.join(",")),
        ];
        if query.fahrenheit {
            params.push(("temperature_unit", "fahrenheit".to_string()));
        }
        params.push(("past_days", query.past_days.to_string()));
        params.push(("forecast_days", query.forecast_days.to_string()));
        params
    }
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    time: Vec<String>,
    #[serde(flatten)]
    values: HashMap<String, Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    hourly: OmHourly,
}

#[async_trait]
impl HourlySource for OpenMeteoSource {
    async fn fetch_hourly(&self, query: &HourlyQuery) -> Result<RawHourly, ForecastError> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&Self::query_params(query))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(ForecastError::UpstreamUnavailable(format!(
                "Open-Meteo request failed with status {}: {}",
                status,
                truncate_body(&body),
            )));
        }

        let parsed: OmResponse = serde_json::from_str(&body).map_err(|e| {
            ForecastError::MalformedResponse(format!("Failed to parse Open-Meteo JSON: {e}"))
        })?;

        tracing::debug!(
            rows = parsed.hourly.time.len(),
            fields = %query.fields.join(","),
            "received hourly records"
        );

        Ok(RawHourly {
            time: parsed.hourly.time,
            columns: parsed.hourly.values,
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::City;

    #[test]
    fn primary_query_requests_fahrenheit() {
        let q = HourlyQuery::for_city(City::Paris, &["temperature_2m", "windspeed_10m"], 3, 3)
            .in_fahrenheit();
        let params = OpenMeteoSource::query_params(&q);

        assert!(params.contains(&("hourly", "temperature_2m,windspeed_10m".to_string())));
        assert!(params.contains(&("temperature_unit", "fahrenheit".to_string())));
        assert!(params.contains(&("past_days", "3".to_string())));
        assert!(params.contains(&("latitude", "48.85".to_string())));
    }

    #[test]
    fn covariate_query_stays_in_celsius() {
        let q = HourlyQuery::for_city(City::Paris, &["apparent_temperature"], 7, 3);
        let params = OpenMeteoSource::query_params(&q);
        assert!(params.iter().all(|(k, _)| *k != "temperature_unit"));
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(150);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 203);
    }

    #[test]
    fn response_with_nulls_parses() {
        let json = r#"{"latitude":48.85,"hourly_units":{"time":"iso8601"},
            "hourly":{"time":["2023-03-10T00:00","2023-03-10T01:00"],
                      "precipitation_probability":[null,5]}}"#;
        let parsed: OmResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.hourly.time.len(), 2);
        assert_eq!(
            parsed.hourly.values["precipitation_probability"],
            vec![None, Some(5.0)]
        );
    }
}
