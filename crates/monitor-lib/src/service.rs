//! Service facade over the monitor pipeline
//!
//! Wires the recorder, aggregator, tracker, ledger and query service
//! over one shared store and exposes the external interface consumed
//! by producers, the presentation layer and operators. The daemon
//! binary builds one of these and little else.

use crate::aggregator::{AggregationConfig, WindowAggregator};
use crate::error::MonitorError;
use crate::ledger::{RetrainingLedger, RetrainingStats};
use crate::models::{
    ModelHealth, PredictionEvent, RetrainingOutcome, TriggerReason, WindowedMetric,
};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::query::{QueryConfig, QueryService};
use crate::recorder::EventRecorder;
use crate::scheduler::{LoopConfig, MonitorLoop};
use crate::store::MetricsStore;
use crate::tracker::{HealthThresholds, HealthTracker};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// All tunables for one monitor instance.
#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub aggregation: AggregationConfig,
    pub thresholds: HealthThresholds,
    pub query: QueryConfig,
    pub loop_config: LoopConfig,
}

/// Pipeline summary for operators (served on `/statusz`).
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub models_tracked: usize,
    pub models_needing_retraining: Vec<String>,
    pub retraining: RetrainingStats,
}

/// The assembled monitor pipeline.
pub struct MonitorService {
    store: Arc<MetricsStore>,
    recorder: EventRecorder,
    aggregator: WindowAggregator,
    tracker: HealthTracker,
    ledger: RetrainingLedger,
    query: QueryService,
    loop_config: LoopConfig,
    metrics: MonitorMetrics,
}

impl MonitorService {
    pub fn new(store: Arc<MetricsStore>, instance: impl Into<String>, settings: MonitorSettings) -> Self {
        let metrics = MonitorMetrics::new();
        let logger = StructuredLogger::new(instance);

        let recorder = EventRecorder::new(store.clone(), metrics.clone(), logger.clone());
        let aggregator =
            WindowAggregator::new(store.clone(), settings.aggregation, metrics.clone());
        let tracker = HealthTracker::new(
            store.clone(),
            settings.thresholds,
            metrics.clone(),
            logger.clone(),
        );
        let ledger = RetrainingLedger::new(
            store.clone(),
            tracker.clone(),
            metrics.clone(),
            logger.clone(),
        );
        let query = QueryService::new(store.clone(), settings.query);

        Self {
            store,
            recorder,
            aggregator,
            tracker,
            ledger,
            query,
            loop_config: settings.loop_config,
            metrics,
        }
    }

    // --- Ingestion -----------------------------------------------------

    /// Validate and durably record one prediction outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_prediction_outcome(
        &self,
        model_id: &str,
        key: u64,
        predicted_block: u32,
        actual_block: u32,
        confidence: f64,
        error_bytes: f64,
        timestamp_ms: i64,
    ) -> Result<(), MonitorError> {
        let event = match PredictionEvent::new(
            model_id,
            key,
            predicted_block,
            actual_block,
            confidence,
            error_bytes,
            timestamp_ms,
        ) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.inc_validation_failures();
                return Err(e);
            }
        };
        self.recorder.record(event).await
    }

    // --- Queries -------------------------------------------------------

    pub fn list_models(&self) -> Vec<String> {
        self.query.list_models()
    }

    pub async fn get_windows(
        &self,
        model_id: &str,
        since_ms: Option<i64>,
        until_ms: Option<i64>,
    ) -> Result<Vec<WindowedMetric>, MonitorError> {
        self.query.get_windows(model_id, since_ms, until_ms).await
    }

    pub async fn get_health(&self, model_id: &str) -> Result<ModelHealth, MonitorError> {
        self.query.get_health(model_id).await
    }

    pub async fn get_retraining_history(
        &self,
        model_id: &str,
        since_ms: Option<i64>,
    ) -> Result<Vec<crate::models::RetrainingEvent>, MonitorError> {
        self.query.get_retraining_history(model_id, since_ms).await
    }

    // --- Operational control -------------------------------------------

    /// Aggregate every window currently due for the model.
    pub async fn force_aggregate(
        &self,
        model_id: &str,
    ) -> Result<Vec<WindowedMetric>, MonitorError> {
        self.aggregator.aggregate_due(model_id).await
    }

    /// Recompute the model's health right now.
    pub async fn force_health_update(&self, model_id: &str) -> Result<ModelHealth, MonitorError> {
        self.tracker.update_health(model_id).await
    }

    /// Record a retraining attempt reported by the external trainer.
    pub async fn record_retraining_outcome(
        &self,
        model_id: &str,
        trigger_reason: TriggerReason,
        outcome: RetrainingOutcome,
        training_sample_count: Option<u64>,
        training_duration_ms: Option<u64>,
    ) -> Result<(), MonitorError> {
        self.ledger
            .record_attempt(
                model_id,
                trigger_reason,
                outcome,
                training_sample_count,
                training_duration_ms,
            )
            .await
    }

    pub async fn models_needing_retrain(&self) -> Vec<String> {
        self.tracker.models_needing_retrain().await
    }

    pub async fn retraining_stats(&self) -> RetrainingStats {
        self.ledger.stats().await
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            models_tracked: self.store.known_models().len(),
            models_needing_retraining: self.models_needing_retrain().await,
            retraining: self.retraining_stats().await,
        }
    }

    // --- Lifecycle -----------------------------------------------------

    /// Spawn the periodic aggregation/health loop.
    pub fn spawn_monitor_loop(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor_loop = MonitorLoop::new(
            self.store.clone(),
            self.aggregator.clone(),
            self.tracker.clone(),
            self.loop_config.clone(),
            self.metrics.clone(),
        );
        tokio::spawn(monitor_loop.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    const WINDOW_MS: i64 = 60_000;

    fn fixture(dir: &TempDir) -> MonitorService {
        let store = Arc::new(
            MetricsStore::open(StoreConfig {
                data_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(365 * 24 * 3600),
            })
            .unwrap(),
        );
        MonitorService::new(store, "test", MonitorSettings::default())
    }

    /// Submit `total` outcomes into the window starting at `base_ms`.
    async fn submit_batch(
        service: &MonitorService,
        model_id: &str,
        base_ms: i64,
        total: u64,
        correct: u64,
    ) {
        for i in 0..total {
            let hit = i < correct;
            service
                .submit_prediction_outcome(
                    model_id,
                    1000 + i,
                    50,
                    if hit { 50 } else { 51 },
                    0.9,
                    if hit { 0.0 } else { 500.0 },
                    base_ms + (i as i64 * WINDOW_MS / total as i64),
                )
                .await
                .unwrap();
        }
    }

    fn recent_window_start() -> i64 {
        let now = crate::now_ms();
        (now.div_euclid(WINDOW_MS) - 10) * WINDOW_MS
    }

    #[tokio::test]
    async fn test_ingest_aggregate_query_round_trip() {
        // 100 events, 85 correct, should land in one finalized window
        let dir = TempDir::new().unwrap();
        let service = fixture(&dir);

        let base = recent_window_start();
        submit_batch(&service, "model-a", base, 100, 85).await;

        service.force_aggregate("model-a").await.unwrap();

        let windows = service
            .get_windows("model-a", Some(base), Some(base + WINDOW_MS))
            .await
            .unwrap();
        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(window.total_predictions, 100);
        assert!((window.accuracy_rate - 0.85).abs() < 1e-12);
        assert!(!window.is_partial);
    }

    #[tokio::test]
    async fn test_rejects_malformed_outcome() {
        let dir = TempDir::new().unwrap();
        let service = fixture(&dir);

        let result = service
            .submit_prediction_outcome("m", 1, 2, 2, 1.7, 0.0, crate::now_ms())
            .await;
        assert!(matches!(result, Err(MonitorError::Validation(_))));
        // Nothing was persisted for the rejected event
        assert!(service.list_models().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_health_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = fixture(&dir);

        let result = service.get_health("model-b").await;
        assert!(matches!(result, Err(MonitorError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_degrade_flag_retrain_recover_lifecycle() {
        let dir = TempDir::new().unwrap();
        let service = fixture(&dir);

        let base = recent_window_start();
        submit_batch(&service, "model-c", base, 100, 70).await;
        service.force_aggregate("model-c").await.unwrap();

        let health = service.force_health_update("model-c").await.unwrap();
        assert!((health.current_accuracy - 0.70).abs() < 1e-12);
        assert!(health.needs_retraining);
        assert_eq!(service.models_needing_retrain().await, vec!["model-c".to_string()]);

        service
            .record_retraining_outcome(
                "model-c",
                TriggerReason::AccuracyThreshold,
                RetrainingOutcome::Succeeded { new_accuracy: 0.96 },
                Some(20_000),
                Some(4_500),
            )
            .await
            .unwrap();

        // The ledger's immediate recomputation already cleared the flag
        let health = service.get_health("model-c").await.unwrap();
        assert!(!health.needs_retraining);
        assert_eq!(health.retrain_count, 1);
        assert!(service.models_needing_retrain().await.is_empty());

        let history = service
            .get_retraining_history("model-c", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_accuracy, Some(0.96));

        let status = service.status().await;
        assert_eq!(status.models_tracked, 1);
        assert!(status.models_needing_retraining.is_empty());
        assert_eq!(status.retraining.successful, 1);
    }

    #[tokio::test]
    async fn test_monitor_loop_spawns_and_stops() {
        let dir = TempDir::new().unwrap();
        let service = fixture(&dir);

        let base = recent_window_start();
        submit_batch(&service, "m", base, 10, 10).await;

        let (tx, rx) = broadcast::channel(1);
        let handle = service.spawn_monitor_loop(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor loop did not stop")
            .unwrap();
    }
}
