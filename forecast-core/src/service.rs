//! Orchestration of the fetch, store, reconcile and predict stages.
//!
//! `ForecastService` owns no global state: the fetcher, store and chart
//! renderer are injected, so the CLI, the scheduler and tests all build their
//! own instance.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::{
    chart::{self, ChartRenderer},
    city::City,
    error::ForecastError,
    fetcher::TimeSeriesFetcher,
    join::join_covariate,
    model::{APPARENT_TEMPERATURE, FetchWarning, Field, PredictionSeries, Snapshot},
    predict::predict_apparent_temperature,
    reconcile::{MergeStats, merge},
    store::{DatasetStore, SnapshotRef},
};

/// Source of the current instant.
pub type Clock = fn() -> DateTime<Utc>;

#[derive(Debug, Clone)]
pub struct Acquired {
    pub snapshot: SnapshotRef,
    pub rows: usize,
    pub warnings: Vec<FetchWarning>,
}

#[derive(Debug, Clone)]
pub struct ForecastReport {
    pub snapshot: SnapshotRef,
    pub field: Field,
    pub column: Vec<(NaiveDateTime, Option<f64>)>,
    pub chart: PathBuf,
    pub warnings: Vec<FetchWarning>,
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub snapshot: SnapshotRef,
    pub stats: MergeStats,
    pub warnings: Vec<FetchWarning>,
}

#[derive(Debug, Clone)]
pub struct FeelsLikeReport {
    pub snapshot: SnapshotRef,
    /// False when the apparent-temperature side table already existed.
    pub side_table_created: bool,
    pub prediction: PredictionSeries,
    pub chart: PathBuf,
    pub warnings: Vec<FetchWarning>,
}

pub struct ForecastService {
    fetcher: TimeSeriesFetcher,
    store: Arc<dyn DatasetStore>,
    renderer: Arc<dyn ChartRenderer>,
    clock: Clock,
}

impl ForecastService {
    pub fn new(
        fetcher: TimeSeriesFetcher,
        store: Arc<dyn DatasetStore>,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Self {
        Self {
            fetcher,
            store,
            renderer,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn DatasetStore> {
        &self.store
    }

    /// Run a store operation on the blocking pool so SQLite I/O never stalls
    /// the async workers.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ForecastError>
    where
        F: FnOnce(&dyn DatasetStore) -> Result<T, ForecastError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Wall-clock "now" in `city`, to the minute.
    pub fn local_now(&self, city: City) -> NaiveDateTime {
        city.local_now((self.clock)())
    }

    /// Fetch `city` and store it as a new generation.
    pub async fn acquire(&self, city: City) -> Result<Acquired, ForecastError> {
        let fetched = self.fetcher.fetch_snapshot(city).await?;
        let rows = fetched.value.len();
        let value = fetched.value;
        let snapshot = self.with_store(move |store| store.create(&value)).await?;

        tracing::info!(
            %city,
            generation = snapshot.generation,
            rows,
            "stored new snapshot"
        );
        Ok(Acquired {
            snapshot,
            rows,
            warnings: fetched.warnings,
        })
    }

    /// Acquire `city`, then chart and return one field of the new snapshot.
    pub async fn forecast(&self, city: City, field: Field) -> Result<ForecastReport, ForecastError> {
        let acquired = self.acquire(city).await?;
        let generation = acquired.snapshot.generation;
        let stored = self.with_store(move |store| store.read(city, generation)).await?;
        let column = stored.column(field);

        let chart = chart::forecast_chart(city, field, &column, self.local_now(city));
        let path = self.renderer.render(&chart)?;

        Ok(ForecastReport {
            snapshot: acquired.snapshot,
            field,
            column,
            chart: path,
            warnings: acquired.warnings,
        })
    }

    /// Re-fetch the most recently created snapshot's city and merge the
    /// fresh rows into it in place.
    pub async fn refresh_latest(&self) -> Result<RefreshReport, ForecastError> {
        let (latest, base) = self.with_store(latest_with_rows).await?;
        let fetched = self.fetcher.fetch_snapshot(latest.city).await?;

        let merged = merge(&base, &fetched.value)?;
        let stats = MergeStats::between(&base, &fetched.value, &merged);
        let (city, generation) = (latest.city, latest.generation);
        self.with_store(move |store| store.replace(city, generation, &merged))
            .await?;

        tracing::info!(
            city = %latest.city,
            generation = latest.generation,
            added = stats.added,
            updated = stats.updated,
            rows = stats.merged_rows,
            "refreshed snapshot"
        );
        Ok(RefreshReport {
            snapshot: latest,
            stats,
            warnings: fetched.warnings,
        })
    }

    /// Predict the apparent temperature for the most recently created snapshot.
    ///
    /// The freshly fetched covariate is stored once as a side table of the
    /// snapshot; `overwrite_covariate` rewrites it instead. `now` defaults to
    /// the city's current wall-clock time.
    pub async fn predict_feels_like(
        &self,
        now: Option<NaiveDateTime>,
        overwrite_covariate: bool,
    ) -> Result<FeelsLikeReport, ForecastError> {
        let (latest, base) = self.with_store(latest_with_rows).await?;
        let fetched = self.fetcher.fetch_apparent_temperature(latest.city).await?;

        let (city, generation) = (latest.city, latest.generation);
        let series = fetched.value;
        let (side_table_created, series) = self
            .with_store(move |store| {
                let created = if overwrite_covariate {
                    store.replace_side_table(city, generation, APPARENT_TEMPERATURE, &series)?;
                    true
                } else {
                    store.create_or_skip(city, generation, APPARENT_TEMPERATURE, &series)?
                };
                Ok((created, series))
            })
            .await?;
        if !side_table_created {
            tracing::debug!(city = %latest.city, "apparent temperature table already stored");
        }

        let augmented = join_covariate(&base, &series)?;
        let now = now.unwrap_or_else(|| self.local_now(latest.city));
        let prediction = predict_apparent_temperature(&augmented, now)?;

        let temperature: Vec<_> = augmented
            .rows
            .iter()
            .map(|r| (r.time(), r.observation.temperature))
            .collect();
        let apparent: Vec<_> = augmented
            .rows
            .iter()
            .map(|r| (r.time(), r.apparent_temperature))
            .collect();
        let chart = chart::feels_like_chart(&temperature, &apparent, &prediction);
        let path = self.renderer.render(&chart)?;

        Ok(FeelsLikeReport {
            snapshot: latest,
            side_table_created,
            prediction,
            chart: path,
            warnings: fetched.warnings,
        })
    }
}

/// The most recently created snapshot and its rows.
fn latest_with_rows(store: &dyn DatasetStore) -> Result<(SnapshotRef, Snapshot), ForecastError> {
    let latest = store.latest()?;
    let rows = store.read(latest.city, latest.generation)?;
    Ok((latest, rows))
}
