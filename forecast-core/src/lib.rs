//! Core library for the `forecast` CLI.
//!
//! This crate defines:
//! - Configuration handling
//! - The hourly weather source abstraction and its Open-Meteo client
//! - Timezone-aware acquisition, generation-based snapshot storage and
//!   reconciliation of fresh data into stored snapshots
//! - The apparent-temperature join and regression forecast
//! - The refresh scheduler that keeps the latest snapshot current
//!
//! It is used by `forecast-cli`, but can also be reused by other binaries or services.

pub mod chart;
pub mod city;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod join;
pub mod model;
pub mod predict;
pub mod provider;
pub mod reconcile;
pub mod regression;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use chart::{ChartRenderer, JsonChartRenderer};
pub use city::City;
pub use config::Config;
pub use error::ForecastError;
pub use fetcher::TimeSeriesFetcher;
pub use model::{Field, Observation, PredictionSeries, Snapshot};
pub use provider::{HourlySource, OpenMeteoSource};
pub use scheduler::{RefreshScheduler, TickOutcome};
pub use service::ForecastService;
pub use store::{DatasetStore, SnapshotRef, SqliteDatasetStore};
