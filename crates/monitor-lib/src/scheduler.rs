//! Periodic aggregation and health-update loop
//!
//! Drives the pipeline on a fixed interval: for every known model,
//! aggregate the windows that have come due, recompute health, and
//! prune in-memory state past retention. A failure or timeout on one
//! model is logged and retried next cycle; it never stops the cycle,
//! and the shutdown signal is observed between model iterations as
//! well as between cycles.

use crate::aggregator::WindowAggregator;
use crate::error::MonitorError;
use crate::observability::MonitorMetrics;
use crate::store::MetricsStore;
use crate::tracker::HealthTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, info, warn};

/// Configuration for the monitor loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Cycle interval; one window width is the natural choice
    /// (default: 60 seconds).
    pub interval: Duration,
    /// Budget for one model's aggregation + health update before the
    /// loop moves on (default: 10 seconds).
    pub model_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            model_timeout: Duration::from_secs(10),
        }
    }
}

/// Results from one monitoring cycle.
#[derive(Debug, Default)]
struct CycleResults {
    processed: usize,
    insufficient: usize,
    errors: usize,
    timeouts: usize,
    stopped: bool,
}

/// Background loop that keeps windows and health current.
pub struct MonitorLoop {
    store: Arc<MetricsStore>,
    aggregator: WindowAggregator,
    tracker: HealthTracker,
    config: LoopConfig,
    metrics: MonitorMetrics,
}

impl MonitorLoop {
    pub fn new(
        store: Arc<MetricsStore>,
        aggregator: WindowAggregator,
        tracker: HealthTracker,
        config: LoopConfig,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            store,
            aggregator,
            tracker,
            config,
            metrics,
        }
    }

    /// Run until the shutdown signal fires. Committed data is never at
    /// risk from a stop: every durable write happens before the next
    /// iteration is considered.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            model_timeout_secs = self.config.model_timeout.as_secs(),
            "Starting monitor loop"
        );

        // Second receiver so the stop signal can also be observed
        // between model iterations inside a cycle.
        let mut mid_cycle = shutdown.resubscribe();
        let mut ticker = interval(self.config.interval);
        let mut cycle_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let results = self.run_cycle(&mut mid_cycle).await;
                    cycle_count += 1;

                    if cycle_count % 10 == 0 {
                        info!(
                            models = results.processed,
                            errors = results.errors,
                            timeouts = results.timeouts,
                            elapsed_ms = start.elapsed().as_millis(),
                            "Monitor cycle complete"
                        );
                    } else {
                        debug!(
                            models = results.processed,
                            insufficient = results.insufficient,
                            errors = results.errors,
                            timeouts = results.timeouts,
                            elapsed_ms = start.elapsed().as_millis(),
                            "Monitor cycle complete"
                        );
                    }

                    if results.stopped {
                        info!("Shutting down monitor loop mid-cycle");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down monitor loop");
                    break;
                }
            }
        }
    }

    async fn run_cycle(&self, shutdown: &mut broadcast::Receiver<()>) -> CycleResults {
        let mut results = CycleResults::default();

        for model_id in self.store.known_models() {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                // A signal (or a closed sender) means stop before the
                // next model, never mid-model.
                _ => {
                    results.stopped = true;
                    return results;
                }
            }

            match timeout(self.config.model_timeout, self.process_model(&model_id)).await {
                Ok(Ok(had_health)) => {
                    results.processed += 1;
                    if !had_health {
                        results.insufficient += 1;
                    }
                }
                Ok(Err(e)) => {
                    results.errors += 1;
                    self.metrics.inc_cycle_errors();
                    warn!(
                        model_id = %model_id,
                        error = %e,
                        "Monitor cycle failed for model; will retry next cycle"
                    );
                }
                Err(_) => {
                    results.timeouts += 1;
                    self.metrics.inc_cycle_errors();
                    warn!(
                        model_id = %model_id,
                        timeout_secs = self.config.model_timeout.as_secs(),
                        "Monitor cycle timed out for model; will retry next cycle"
                    );
                }
            }
        }

        self.metrics
            .set_models_tracked(self.store.known_models().len() as i64);
        self.metrics
            .set_models_needing_retraining(self.tracker.models_needing_retrain().await.len() as i64);

        results
    }

    /// Aggregate, update health, prune. Returns whether health was
    /// computable; models too young for health are expected, not
    /// errors.
    async fn process_model(&self, model_id: &str) -> Result<bool, MonitorError> {
        self.aggregator.aggregate_due(model_id).await?;

        let had_health = match self.tracker.update_health(model_id).await {
            Ok(_) => true,
            Err(MonitorError::InsufficientData { .. }) => {
                debug!(model_id = %model_id, "Not enough finalized data for health yet");
                false
            }
            Err(e) => return Err(e),
        };

        self.store.prune_model(model_id).await?;
        Ok(had_health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregationConfig;
    use crate::models::PredictionEvent;
    use crate::observability::StructuredLogger;
    use crate::store::StoreConfig;
    use crate::tracker::HealthThresholds;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> (MonitorLoop, Arc<MetricsStore>) {
        let store = Arc::new(
            MetricsStore::open(StoreConfig {
                data_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(365 * 24 * 3600),
            })
            .unwrap(),
        );
        let metrics = MonitorMetrics::new();
        let logger = StructuredLogger::new("test");
        let aggregator =
            WindowAggregator::new(store.clone(), AggregationConfig::default(), metrics.clone());
        let tracker = HealthTracker::new(
            store.clone(),
            HealthThresholds::default(),
            metrics.clone(),
            logger,
        );
        let monitor_loop = MonitorLoop::new(
            store.clone(),
            aggregator,
            tracker,
            LoopConfig {
                interval: Duration::from_millis(20),
                model_timeout: Duration::from_secs(5),
            },
            metrics,
        );
        (monitor_loop, store)
    }

    async fn seed(store: &MetricsStore, model_id: &str, minutes_ago: i64, correct: bool) {
        let ts = crate::now_ms() - minutes_ago * 60_000;
        let event = PredictionEvent::new(
            model_id,
            9,
            2,
            if correct { 2 } else { 5 },
            0.9,
            if correct { 0.0 } else { 128.0 },
            ts,
        )
        .unwrap();
        store.append_event(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_aggregates_and_updates_health() {
        let dir = TempDir::new().unwrap();
        let (monitor_loop, store) = fixture(&dir);

        // Events a few minutes back so their windows are final
        for i in 2..6 {
            seed(&store, "m", i, true).await;
        }

        let (_tx, mut rx) = broadcast::channel(1);
        let results = monitor_loop.run_cycle(&mut rx).await;
        assert_eq!(results.processed, 1);
        assert_eq!(results.errors, 0);
        assert!(!results.stopped);

        let health = store.health_row("m").await.unwrap().unwrap();
        assert!((health.current_accuracy - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_young_model_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let (monitor_loop, store) = fixture(&dir);

        // One model with finalized history, one that only just reported
        seed(&store, "old", 3, true).await;
        seed(&store, "young", 0, true).await;

        let (_tx, mut rx) = broadcast::channel(1);
        let results = monitor_loop.run_cycle(&mut rx).await;
        assert_eq!(results.processed, 2);
        assert_eq!(results.errors, 0);
        assert_eq!(results.insufficient, 1);

        assert!(store.health_row("old").await.unwrap().is_some());
        assert!(store.health_row("young").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_signal_observed_between_models() {
        let dir = TempDir::new().unwrap();
        let (monitor_loop, store) = fixture(&dir);
        seed(&store, "a", 3, true).await;
        seed(&store, "b", 3, true).await;

        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let results = monitor_loop.run_cycle(&mut rx).await;
        assert!(results.stopped);
        assert_eq!(results.processed, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (monitor_loop, store) = fixture(&dir);
        seed(&store, "m", 3, true).await;

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor_loop.run(rx));

        // Let at least one cycle run, then stop
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop on shutdown signal")
            .unwrap();

        // Committed data survived the stop
        assert!(store.health_row("m").await.unwrap().is_some());
    }
}
