use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forecast_core::{
    City, Config, DatasetStore, ForecastError, ForecastService, JsonChartRenderer, OpenMeteoSource,
    RefreshScheduler, SqliteDatasetStore, TickOutcome, TimeSeriesFetcher,
    model::{FetchWarning, Field, parse_timestamp},
};
use inquire::{Confirm, CustomType, Select, Text};
use std::sync::Arc;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "forecast", version, about = "City weather forecast CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List supported cities.
    Cities,

    /// Interactively edit the configuration file.
    Configure,

    /// Fetch a city's forecast and store it as a new snapshot.
    Fetch {
        /// City name; prompted for when omitted.
        city: Option<City>,
    },

    /// Fetch a city's forecast and show one field.
    Forecast {
        city: Option<City>,

        /// e.g. "temperature", "wind speed" or "windspeed_10m".
        #[arg(long)]
        field: Option<Field>,
    },

    /// Merge a fresh fetch into the most recently created snapshot.
    Refresh,

    /// Predict the feels-like temperature for the most recently created snapshot.
    Predict {
        /// Local time to split at (YYYY-MM-DDTHH:MM); defaults to now.
        #[arg(long)]
        now: Option<String>,

        /// Rewrite the stored apparent-temperature table.
        #[arg(long)]
        overwrite_covariate: bool,
    },

    /// Refresh periodically until Ctrl-C.
    Watch,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let cfg = Config::load()?;

        match self.command {
            Command::Cities => {
                let store = open_store(&cfg)?;
                for city in City::all() {
                    let (lat, lon) = city.coordinates();
                    let latest = match store.latest_for(*city)? {
                        Some(snapshot) => snapshot.table_name(),
                        None => "-".to_string(),
                    };
                    println!(
                        "{:<10} {lat:>7.2} {lon:>7.2}  UTC+{}  {latest}",
                        city.as_str(),
                        city.utc_offset_hours()
                    );
                }
            }
            Command::Configure => configure(cfg)?,
            Command::Fetch { city } => {
                let city = resolve_city(city)?;
                let acquired = build_service(&cfg)?
                    .acquire(city)
                    .await
                    .map_err(friendly)?;
                print_warnings(&acquired.warnings);
                println!(
                    "Stored {} rows as {}",
                    acquired.rows,
                    acquired.snapshot.table_name()
                );
            }
            Command::Forecast { city, field } => {
                let city = resolve_city(city)?;
                let field = field.unwrap_or(Field::Temperature);
                let report = build_service(&cfg)?
                    .forecast(city, field)
                    .await
                    .map_err(friendly)?;

                print_warnings(&report.warnings);
                println!("{city}: {field} ({})", field.unit());
                for (time, value) in &report.column {
                    match value {
                        Some(v) => println!("  {time}  {v:>7.2}"),
                        None => println!("  {time}        -"),
                    }
                }
                println!("Chart: {}", report.chart.display());
            }
            Command::Refresh => {
                let report = build_service(&cfg)?
                    .refresh_latest()
                    .await
                    .map_err(friendly)?;
                print_warnings(&report.warnings);
                println!(
                    "Refreshed {}: {} added, {} updated, {} rows",
                    report.snapshot.table_name(),
                    report.stats.added,
                    report.stats.updated,
                    report.stats.merged_rows
                );
            }
            Command::Predict {
                now,
                overwrite_covariate,
            } => {
                let now = now.as_deref().map(parse_timestamp).transpose()?;
                let report = build_service(&cfg)?
                    .predict_feels_like(now, overwrite_covariate)
                    .await
                    .map_err(friendly)?;

                print_warnings(&report.warnings);
                let p = &report.prediction;
                println!(
                    "{}: trained on {} rows before {} (R² {:.3})",
                    p.city, p.training_rows, p.now, p.r_squared
                );
                println!("  {:<19} {:>8} {:>10}", "time", "actual", "predicted");
                for point in &p.points {
                    let actual = point
                        .actual
                        .map(|v| format!("{v:.2}"))
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {:<19} {actual:>8} {:>10.2}", point.time, point.predicted);
                }
                if p.skipped > 0 {
                    println!("  ({} rows skipped for missing measurements)", p.skipped);
                }
                println!("Chart: {}", report.chart.display());
            }
            Command::Watch => watch(&cfg).await?,
        }

        Ok(())
    }
}

fn build_service(cfg: &Config) -> Result<ForecastService> {
    let source = OpenMeteoSource::from_config(&cfg.api)?;
    let fetcher = TimeSeriesFetcher::new(Arc::new(source), cfg.window)
        .with_strict_lengths(cfg.strict_lengths);

    let store = open_store(cfg)?;
    let renderer = JsonChartRenderer::new(cfg.chart_dir()?);

    Ok(ForecastService::new(
        fetcher,
        Arc::new(store),
        Arc::new(renderer),
    ))
}

fn open_store(cfg: &Config) -> Result<SqliteDatasetStore> {
    let db = cfg.database_path()?;
    SqliteDatasetStore::open(&db)
        .with_context(|| format!("Failed to open snapshot database: {}", db.display()))
}

fn resolve_city(city: Option<City>) -> Result<City> {
    match city {
        Some(city) => Ok(city),
        None => Select::new("City:", City::all().to_vec())
            .prompt()
            .context("No city selected"),
    }
}

/// Keep the full error chain but lead with the end-user message.
fn friendly(e: ForecastError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

fn print_warnings(warnings: &[FetchWarning]) {
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

fn configure(mut cfg: Config) -> Result<()> {
    let base_url = cfg.api.base_url.clone();
    cfg.api.base_url = Text::new("Weather API URL:")
        .with_default(&base_url)
        .prompt()?;
    cfg.api.timeout_secs = CustomType::<u64>::new("Request timeout (seconds):")
        .with_default(cfg.api.timeout_secs)
        .prompt()?;
    cfg.refresh.interval_secs = CustomType::<u64>::new("Refresh interval (seconds):")
        .with_default(cfg.refresh.interval_secs)
        .prompt()?;
    cfg.strict_lengths = Confirm::new("Fail fetches whose columns have different lengths?")
        .with_default(cfg.strict_lengths)
        .prompt()?;

    cfg.validate()?;
    cfg.save()?;
    println!("Saved {}", Config::config_file_path()?.display());
    Ok(())
}

async fn watch(cfg: &Config) -> Result<()> {
    let service = Arc::new(build_service(cfg)?);
    let scheduler = RefreshScheduler::spawn(service, cfg.refresh_interval());
    let mut outcomes = scheduler.subscribe();

    println!(
        "Refreshing every {}s, press Ctrl-C to stop",
        cfg.refresh.interval_secs
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = outcomes.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*outcomes.borrow_and_update() {
                    TickOutcome::Idle => {}
                    TickOutcome::Refreshed { tick, report } => println!(
                        "[{tick}] {}: {} added, {} updated",
                        report.snapshot.table_name(),
                        report.stats.added,
                        report.stats.updated
                    ),
                    TickOutcome::Failed { tick, message, .. } => {
                        eprintln!("[{tick}] refresh failed: {message}")
                    }
                }
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
