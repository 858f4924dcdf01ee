//! Periodic refresh of the latest snapshot.
//!
//! The scheduler task is the only writer driven in the background. A failed
//! tick is logged and published, then the loop waits for the next one.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::service::{ForecastService, RefreshReport};

/// Result of the most recent tick.
#[derive(Debug, Clone, Default)]
pub enum TickOutcome {
    #[default]
    Idle,
    Refreshed {
        tick: u64,
        report: RefreshReport,
    },
    Failed {
        tick: u64,
        message: String,
        transient: bool,
    },
}

impl TickOutcome {
    pub fn tick(&self) -> u64 {
        match self {
            TickOutcome::Idle => 0,
            TickOutcome::Refreshed { tick, .. } | TickOutcome::Failed { tick, .. } => *tick,
        }
    }
}

pub struct RefreshScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    outcomes: watch::Receiver<TickOutcome>,
}

impl RefreshScheduler {
    /// Start refreshing every `every`; the first tick runs immediately.
    pub fn spawn(service: Arc<ForecastService>, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let (tx, outcomes) = watch::channel(TickOutcome::Idle);

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tick += 1;

                let outcome = match service.refresh_latest().await {
                    Ok(report) => TickOutcome::Refreshed { tick, report },
                    Err(e) => {
                        tracing::warn!(tick, error = %e, "refresh tick failed");
                        TickOutcome::Failed {
                            tick,
                            message: e.to_string(),
                            transient: e.is_transient(),
                        }
                    }
                };
                tx.send_replace(outcome);
            }
            tracing::debug!(ticks = tick, "refresh scheduler stopped");
        });

        tracing::info!(interval_secs = every.as_secs(), "refresh scheduler started");
        Self {
            cancel,
            handle,
            outcomes,
        }
    }

    /// Receiver that observes every published tick outcome.
    pub fn subscribe(&self) -> watch::Receiver<TickOutcome> {
        self.outcomes.clone()
    }

    /// Stop scheduling ticks and wait for the one in flight, if any.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "refresh scheduler task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chart::NoopRenderer,
        city::City,
        config::WindowConfig,
        fetcher::TimeSeriesFetcher,
        store::SqliteDatasetStore,
        testing::{ScriptedSource, hourly},
    };

    fn service() -> Arc<ForecastService> {
        let columns: Vec<(&str, Vec<f64>)> = vec![
            ("temperature_2m", vec![50.0; 6]),
            ("relativehumidity_2m", vec![70.0; 6]),
            ("precipitation_probability", vec![0.0; 6]),
            ("windspeed_10m", vec![12.0; 6]),
        ];
        let source = Arc::new(
            ScriptedSource::new().respond("temperature_2m", hourly("2023-03-10T00:00", 6, &columns)),
        );
        let fetcher = TimeSeriesFetcher::new(source, WindowConfig::default());
        let store = Arc::new(SqliteDatasetStore::in_memory().unwrap());
        Arc::new(ForecastService::new(fetcher, store, Arc::new(NoopRenderer)))
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_runs_immediately_and_repeats() {
        let svc = service();
        svc.acquire(City::London).await.unwrap();

        let scheduler = RefreshScheduler::spawn(svc, Duration::from_secs(300));
        let mut rx = scheduler.subscribe();

        rx.changed().await.unwrap();
        assert!(matches!(
            &*rx.borrow(),
            TickOutcome::Refreshed { tick: 1, report } if report.stats.merged_rows == 6
        ));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().tick(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_does_not_stop_the_loop() {
        let scheduler = RefreshScheduler::spawn(service(), Duration::from_secs(60));
        let mut rx = scheduler.subscribe();

        rx.changed().await.unwrap();
        assert!(matches!(
            &*rx.borrow(),
            TickOutcome::Failed { tick: 1, transient: true, .. }
        ));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().tick(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_publishing() {
        let scheduler = RefreshScheduler::spawn(service(), Duration::from_secs(60));
        let mut rx = scheduler.subscribe();
        rx.changed().await.unwrap();

        scheduler.shutdown().await;
        assert!(rx.changed().await.is_err());
    }
}
