//! Health and metrics supervision loops
//!
//! Two background tasks drive the registry on fixed intervals:
//!
//! - Health sweep every `health_check_interval_secs` (probes all instances
//!   concurrently, records transitions)
//! - Metrics sweep every `metrics_interval_secs` (appends to each
//!   instance's rolling history)
//!
//! A failing instance never stops a sweep. Both loops run their first sweep
//! immediately and exit when [`Supervisor::shutdown`] is awaited.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::ProviderRegistry;

/// Handle to the running supervision loops
#[derive(Debug)]
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone, Copy)]
enum Sweep {
    Health,
    Metrics,
}

impl Sweep {
    fn name(self) -> &'static str {
        match self {
            Sweep::Health => "health",
            Sweep::Metrics => "metrics",
        }
    }
}

impl Supervisor {
    /// Spawn both loops on the current tokio runtime
    pub fn spawn(registry: Arc<ProviderRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let health_interval = registry.config().health_check_interval();
        let metrics_interval = registry.config().metrics_interval();

        info!(
            "Supervision started (health every {}s, metrics every {}s)",
            health_interval.as_secs(),
            metrics_interval.as_secs()
        );

        let tasks = vec![
            tokio::spawn(run_loop(
                Arc::clone(&registry),
                Sweep::Health,
                health_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_loop(registry, Sweep::Metrics, metrics_interval, shutdown_rx)),
        ];

        Self { shutdown_tx, tasks }
    }

    /// Stop both loops and wait for them to exit
    ///
    /// A sweep already in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Supervision task ended abnormally: {}", e);
            }
        }

        info!("Supervision stopped");
    }
}

async fn run_loop(
    registry: Arc<ProviderRegistry>,
    sweep: Sweep,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep {
                    Sweep::Health => {
                        let results = registry.check_all_health().await;
                        debug!("Health sweep checked {} provider(s)", results.len());
                    }
                    Sweep::Metrics => {
                        let results = registry.collect_all_metrics().await;
                        debug!("Metrics sweep collected {} provider(s)", results.len());
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Stopping {} loop", sweep.name());
                    break;
                }
            }
        }
    }
}
