//! Retraining attempt ledger
//!
//! Append-only audit trail of retraining attempts. A successful attempt
//! immediately triggers a health recomputation so the flags reflect the
//! reported accuracy without waiting for the next window; a failed
//! attempt is recorded but leaves the health flags untouched.

use crate::error::MonitorError;
use crate::models::{RetrainingEvent, RetrainingOutcome, TriggerReason};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::MetricsStore;
use crate::tracker::HealthTracker;
use std::sync::Arc;

/// Ledger totals, derived from the append-only retraining logs.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RetrainingStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub scheduled_triggers: u64,
    pub accuracy_threshold_triggers: u64,
    pub manual_triggers: u64,
    /// Mean duration over attempts that reported one.
    pub average_duration_ms: Option<f64>,
}

/// Records retraining attempts and their effect on health.
#[derive(Clone)]
pub struct RetrainingLedger {
    store: Arc<MetricsStore>,
    tracker: HealthTracker,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl RetrainingLedger {
    pub fn new(
        store: Arc<MetricsStore>,
        tracker: HealthTracker,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            tracker,
            metrics,
            logger,
        }
    }

    /// Append one retraining attempt for a known model.
    ///
    /// The attempt is durable once this returns, success or failure. On
    /// success the model's health is recomputed immediately; the
    /// recomputation reads the ledger, so `retrain_count`,
    /// `last_retrain_timestamp_ms` and the retraining flag all move in
    /// the same update.
    pub async fn record_attempt(
        &self,
        model_id: &str,
        trigger_reason: TriggerReason,
        outcome: RetrainingOutcome,
        training_sample_count: Option<u64>,
        training_duration_ms: Option<u64>,
    ) -> Result<(), MonitorError> {
        let event = RetrainingEvent::new(
            model_id,
            crate::now_ms(),
            trigger_reason,
            outcome,
            training_sample_count,
            training_duration_ms,
        )?;

        // Retraining must reference a model that has reported; unknown
        // models are a caller error, not a new shard.
        let shard = self.store.shard(model_id)?;
        {
            let mut state = shard.write().await;
            state.append_retraining(&event)?;
        }

        self.metrics.inc_retraining_attempts(
            if event.success { "success" } else { "failure" },
            trigger_reason.as_str(),
        );
        self.logger.log_retraining_outcome(&event);

        if event.success {
            self.tracker.update_health(model_id).await?;
        }
        Ok(())
    }

    /// Totals across every model's ledger.
    pub async fn stats(&self) -> RetrainingStats {
        let mut stats = RetrainingStats::default();
        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;

        for model_id in self.store.known_models() {
            let Ok(events) = self.store.retraining_since(&model_id, i64::MIN).await else {
                continue;
            };
            for event in events {
                stats.total_attempts += 1;
                if event.success {
                    stats.successful += 1;
                } else {
                    stats.failed += 1;
                }
                match event.trigger_reason {
                    TriggerReason::Scheduled => stats.scheduled_triggers += 1,
                    TriggerReason::AccuracyThreshold => stats.accuracy_threshold_triggers += 1,
                    TriggerReason::Manual => stats.manual_triggers += 1,
                }
                if let Some(duration) = event.training_duration_ms {
                    duration_sum += duration;
                    duration_count += 1;
                }
            }
        }

        if duration_count > 0 {
            stats.average_duration_ms = Some(duration_sum as f64 / duration_count as f64);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WindowedMetric;
    use crate::store::StoreConfig;
    use crate::tracker::HealthThresholds;
    use std::time::Duration;
    use tempfile::TempDir;

    const WINDOW_MS: i64 = 60_000;

    fn fixture(dir: &TempDir) -> (RetrainingLedger, HealthTracker, Arc<MetricsStore>) {
        let store = Arc::new(
            MetricsStore::open(StoreConfig {
                data_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(365 * 24 * 3600),
            })
            .unwrap(),
        );
        let metrics = MonitorMetrics::new();
        let logger = StructuredLogger::new("test");
        let tracker = HealthTracker::new(
            store.clone(),
            HealthThresholds::default(),
            metrics.clone(),
            logger.clone(),
        );
        let ledger = RetrainingLedger::new(store.clone(), tracker.clone(), metrics, logger);
        (ledger, tracker, store)
    }

    async fn seed_poor_model(store: &MetricsStore, tracker: &HealthTracker, model_id: &str) -> i64 {
        let now = crate::now_ms();
        let shard = store.ensure_shard(model_id).unwrap();
        {
            let mut state = shard.write().await;
            state.set_window(WindowedMetric {
                model_id: model_id.to_string(),
                window_start_ms: now - 2 * WINDOW_MS,
                window_end_ms: now - WINDOW_MS,
                total_predictions: 100,
                correct_predictions: 70,
                accuracy_rate: 0.70,
                average_confidence: 0.8,
                average_error_bytes: 400.0,
                throughput_qps: 100.0 / 60.0,
                is_partial: false,
            });
            state.persist_windows().unwrap();
        }
        tracker.update_health(model_id).await.unwrap();
        now
    }

    #[tokio::test]
    async fn test_record_attempt_for_unknown_model_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (ledger, _tracker, _store) = fixture(&dir);

        let result = ledger
            .record_attempt(
                "ghost",
                TriggerReason::Manual,
                RetrainingOutcome::Succeeded { new_accuracy: 0.9 },
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(MonitorError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_successful_attempt_updates_health_immediately() {
        let dir = TempDir::new().unwrap();
        let (ledger, _tracker, store) = fixture(&dir);
        seed_poor_model(&store, &ledger.tracker, "m").await;

        let before = store.health_row("m").await.unwrap().unwrap();
        assert!(before.needs_retraining);
        assert_eq!(before.retrain_count, 0);

        ledger
            .record_attempt(
                "m",
                TriggerReason::AccuracyThreshold,
                RetrainingOutcome::Succeeded { new_accuracy: 0.96 },
                Some(5_000),
                Some(1_200),
            )
            .await
            .unwrap();

        let after = store.health_row("m").await.unwrap().unwrap();
        assert!(!after.needs_retraining);
        assert_eq!(after.retrain_count, 1);
        assert!(after.last_retrain_timestamp_ms.is_some());
        assert!((after.current_accuracy - 0.96).abs() < 1e-12);

        let history = store.retraining_since("m", i64::MIN).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_recorded_but_leaves_health_untouched() {
        let dir = TempDir::new().unwrap();
        let (ledger, _tracker, store) = fixture(&dir);
        seed_poor_model(&store, &ledger.tracker, "m").await;

        let before = store.health_row("m").await.unwrap().unwrap();
        ledger
            .record_attempt(
                "m",
                TriggerReason::Scheduled,
                RetrainingOutcome::Failed {
                    error_message: "training data unavailable".to_string(),
                },
                None,
                Some(300),
            )
            .await
            .unwrap();

        let after = store.health_row("m").await.unwrap().unwrap();
        assert_eq!(after, before, "failed attempt must not touch health");

        let history = store.retraining_since("m", i64::MIN).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(
            history[0].error_message.as_deref(),
            Some("training data unavailable")
        );
    }

    #[tokio::test]
    async fn test_stats_tally_outcomes_and_triggers() {
        let dir = TempDir::new().unwrap();
        let (ledger, _tracker, store) = fixture(&dir);
        seed_poor_model(&store, &ledger.tracker, "a").await;
        seed_poor_model(&store, &ledger.tracker, "b").await;

        ledger
            .record_attempt(
                "a",
                TriggerReason::AccuracyThreshold,
                RetrainingOutcome::Succeeded { new_accuracy: 0.95 },
                Some(100),
                Some(1_000),
            )
            .await
            .unwrap();
        ledger
            .record_attempt(
                "b",
                TriggerReason::Manual,
                RetrainingOutcome::Failed {
                    error_message: "oom".to_string(),
                },
                None,
                Some(3_000),
            )
            .await
            .unwrap();

        let stats = ledger.stats().await;
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.accuracy_threshold_triggers, 1);
        assert_eq!(stats.manual_triggers, 1);
        assert_eq!(stats.average_duration_ms, Some(2_000.0));
    }
}
