//! Per-model health tracking
//!
//! Derives each model's health snapshot from its finalized windows and
//! its retraining ledger. Every input to the computation is durable
//! (windows, ledger, the previous health row), so a health row is
//! always reproducible from the store alone.

use crate::error::MonitorError;
use crate::models::{HealthState, ModelHealth, RetrainingEvent, WindowedMetric};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Thresholds and lookbacks for health computation.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Accuracy below this flags the model as degrading (default 0.90).
    pub accuracy_floor: f64,
    /// Short trend below this flags the model as degrading
    /// (default -0.01 per lookback period).
    pub trend_floor: f64,
    /// Accuracy below this flags the model for retraining (default 0.85).
    pub retrain_floor: f64,
    /// Short trend lookback (default 1 hour).
    pub short_lookback: Duration,
    /// Long trend lookback (default 7 days).
    pub long_lookback: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            accuracy_floor: 0.90,
            trend_floor: -0.01,
            retrain_floor: 0.85,
            short_lookback: Duration::from_secs(60 * 60),
            long_lookback: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Recomputes and stores `ModelHealth` rows.
#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<MetricsStore>,
    thresholds: HealthThresholds,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl HealthTracker {
    pub fn new(
        store: Arc<MetricsStore>,
        thresholds: HealthThresholds,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            thresholds,
            metrics,
            logger,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Recompute the model's health from finalized windows and the
    /// retraining ledger, store the new row, and return it.
    ///
    /// `InsufficientData` when no finalized window with predictions
    /// exists and no successful retraining can stand in; callers must
    /// treat the model as unknown, never as healthy.
    pub async fn update_health(&self, model_id: &str) -> Result<ModelHealth, MonitorError> {
        self.update_health_at(model_id, crate::now_ms()).await
    }

    pub(crate) async fn update_health_at(
        &self,
        model_id: &str,
        now_ms: i64,
    ) -> Result<ModelHealth, MonitorError> {
        let shard = self.store.shard(model_id)?;
        // The whole read-compute-write cycle holds the shard write lock,
        // so a scheduled recompute and a post-retraining recompute
        // serialize rather than interleave.
        let mut state = shard.write().await;

        let finalized: Vec<&WindowedMetric> = state
            .windows
            .values()
            .filter(|w| !w.is_partial)
            .collect();
        let latest_success = latest_successful_retrain(&state.retraining);

        // Windows with no predictions carry no accuracy signal.
        let newest_observed = finalized
            .iter()
            .rev()
            .find(|w| w.total_predictions > 0)
            .copied();

        // A retraining newer than every observation stands in for
        // current accuracy until fresher windows exist.
        let (current_accuracy, standin_retrain) = match (newest_observed, latest_success) {
            (Some(w), Some((retrain_ts, acc))) if retrain_ts > w.window_end_ms => {
                (acc, Some(retrain_ts))
            }
            (Some(w), _) => (w.accuracy_rate, None),
            (None, Some((retrain_ts, acc))) => (acc, Some(retrain_ts)),
            (None, None) => return Err(MonitorError::insufficient_data(model_id)),
        };

        // Trends never mix pre- and post-retraining accuracy.
        let trend_horizon = latest_success.map(|(ts, _)| ts);
        let trend_source: Vec<&WindowedMetric> = finalized
            .iter()
            .filter(|w| w.total_predictions > 0)
            .filter(|w| trend_horizon.map_or(true, |ts| w.window_start_ms >= ts))
            .copied()
            .collect();

        let short_ms = self.thresholds.short_lookback.as_millis() as i64;
        let long_ms = self.thresholds.long_lookback.as_millis() as i64;
        let trend_short = trend_against_mean(&trend_source, now_ms - short_ms, current_accuracy);
        let trend_long = trend_against_mean(&trend_source, now_ms - long_ms, current_accuracy);

        let is_degrading = current_accuracy < self.thresholds.accuracy_floor
            || trend_short < self.thresholds.trend_floor;
        let raw_needs_retraining = current_accuracy < self.thresholds.retrain_floor;

        // The retraining flag latches: once raised it only clears when a
        // successful retraining newer than the raise is on the ledger,
        // never from the mere passage of time.
        let prev = state.health.as_ref();
        let prev_needs = prev.map_or(false, |h| h.needs_retraining);
        let prev_since = prev.and_then(|h| h.needs_retraining_since_ms);
        let cleared_by_retrain = match prev_since {
            Some(since) => latest_success.map_or(false, |(ts, _)| ts >= since),
            None => false,
        };
        let latched = prev_needs && !cleared_by_retrain;
        let needs_retraining = raw_needs_retraining || latched;
        let needs_retraining_since_ms = if latched {
            prev_since
        } else if needs_retraining {
            Some(now_ms)
        } else {
            None
        };

        let retrain_count = state.retraining.iter().filter(|e| e.success).count() as u64;
        let last_retrain_timestamp_ms = latest_success.map(|(ts, _)| ts);

        let health = ModelHealth {
            model_id: model_id.to_string(),
            last_training_timestamp_ms: last_retrain_timestamp_ms,
            total_queries_served: state.queries_served,
            current_accuracy,
            trend_short,
            trend_long,
            is_degrading,
            needs_retraining,
            needs_retraining_since_ms,
            last_retrain_timestamp_ms,
            retrain_count,
            updated_at_ms: now_ms,
        };

        self.log_transitions(prev, &health);
        self.metrics.inc_health_updates();
        debug!(
            model_id = %model_id,
            current_accuracy,
            trend_short,
            trend_long,
            is_degrading,
            needs_retraining,
            standin_retrain = ?standin_retrain,
            "Health updated"
        );

        state.put_health(health.clone())?;
        Ok(health)
    }

    fn log_transitions(&self, prev: Option<&ModelHealth>, next: &ModelHealth) {
        let prev_state = prev.map(|h| h.state());
        let next_state = next.state();
        if prev_state == Some(next_state) {
            return;
        }

        match next_state {
            HealthState::CriticalNeedsRetrain => {
                self.logger
                    .log_retraining_needed(&next.model_id, next.current_accuracy);
            }
            HealthState::Degrading => {
                self.logger.log_degradation_detected(
                    &next.model_id,
                    next.current_accuracy,
                    next.trend_short,
                );
            }
            HealthState::Healthy => {
                if prev_state.is_some() {
                    self.logger
                        .log_health_recovered(&next.model_id, next.current_accuracy);
                }
            }
            HealthState::Unknown => {}
        }
    }

    /// Models whose stored health currently flags retraining.
    pub async fn models_needing_retrain(&self) -> Vec<String> {
        let mut flagged = Vec::new();
        for model_id in self.store.known_models() {
            if let Ok(Some(health)) = self.store.health_row(&model_id).await {
                if health.needs_retraining {
                    flagged.push(model_id);
                }
            }
        }
        flagged
    }
}

fn latest_successful_retrain(events: &[RetrainingEvent]) -> Option<(i64, f64)> {
    events
        .iter()
        .filter(|e| e.success)
        .filter_map(|e| e.new_accuracy.map(|acc| (e.timestamp_ms, acc)))
        .max_by_key(|(ts, _)| *ts)
}

/// Signed difference between current accuracy and the mean accuracy of
/// windows starting at or after `cutoff_ms`. Zero when the lookback
/// holds no windows.
fn trend_against_mean(windows: &[&WindowedMetric], cutoff_ms: i64, current_accuracy: f64) -> f64 {
    let accuracies: Vec<f64> = windows
        .iter()
        .filter(|w| w.window_start_ms >= cutoff_ms)
        .map(|w| w.accuracy_rate)
        .collect();
    if accuracies.is_empty() {
        return 0.0;
    }
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    current_accuracy - mean
}
