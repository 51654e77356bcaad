//! Fixed-width window aggregation
//!
//! Folds recorded prediction events into non-overlapping, width-aligned
//! windows `[start, start + width)`. A window becomes final once
//! `now >= window_end + finalize_grace` (the grace period is the
//! assumed maximum event-reporting delay); finalized windows are never
//! recomputed, which is what keeps aggregation idempotent and keeps
//! late events out by construction.

use crate::error::MonitorError;
use crate::models::WindowedMetric;
use crate::observability::MonitorMetrics;
use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for window aggregation.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Window width (default: 60 seconds).
    pub window: Duration,
    /// How long after a window ends events may still arrive for it
    /// (default: 5 seconds). Until then the window stays partial.
    pub finalize_grace: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            finalize_grace: Duration::from_secs(5),
        }
    }
}

impl AggregationConfig {
    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }

    pub fn grace_ms(&self) -> i64 {
        self.finalize_grace.as_millis() as i64
    }

    /// Start of the window containing `timestamp_ms`.
    pub fn window_start_for(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms.div_euclid(self.window_ms()) * self.window_ms()
    }
}

/// Computes and upserts windowed metrics from the event log.
#[derive(Clone)]
pub struct WindowAggregator {
    store: Arc<MetricsStore>,
    config: AggregationConfig,
    metrics: MonitorMetrics,
}

impl WindowAggregator {
    pub fn new(store: Arc<MetricsStore>, config: AggregationConfig, metrics: MonitorMetrics) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate one window for one model and upsert the result.
    ///
    /// If the stored copy of the window is already final it is returned
    /// as-is without recomputation. Otherwise the window is recomputed
    /// from the events currently in `[start, end)` and marked partial or
    /// final depending on the clock.
    pub async fn aggregate(
        &self,
        model_id: &str,
        window_start_ms: i64,
    ) -> Result<WindowedMetric, MonitorError> {
        self.aggregate_at(model_id, window_start_ms, crate::now_ms())
            .await
    }

    pub(crate) async fn aggregate_at(
        &self,
        model_id: &str,
        window_start_ms: i64,
        now_ms: i64,
    ) -> Result<WindowedMetric, MonitorError> {
        let window_ms = self.config.window_ms();
        if window_start_ms.rem_euclid(window_ms) != 0 {
            return Err(MonitorError::validation(format!(
                "window_start {} is not aligned to the {}ms window width",
                window_start_ms, window_ms
            )));
        }

        let shard = self.store.shard(model_id)?;
        let mut state = shard.write().await;

        if let Some(existing) = state.windows.get(&window_start_ms) {
            if !existing.is_partial {
                return Ok(existing.clone());
            }
        }

        let window_end_ms = window_start_ms + window_ms;
        let events = state.events_in(window_start_ms, window_end_ms);
        let is_partial = now_ms < window_end_ms + self.config.grace_ms();
        let metric = WindowedMetric::from_events(
            model_id,
            window_start_ms,
            window_end_ms,
            &events,
            is_partial,
        );

        if !is_partial {
            self.metrics.add_windows_finalized(1);
            debug!(
                model_id = %model_id,
                window_start_ms,
                total = metric.total_predictions,
                accuracy = metric.accuracy_rate,
                "Window finalized"
            );
        }

        state.set_window(metric.clone());
        state.persist_windows()?;
        Ok(metric)
    }

    /// Aggregate every window that is due for the model: from the first
    /// window after the newest finalized one (clamped to the retention
    /// horizon) up to and including the window containing `now`. The
    /// trailing windows inside the grace period stay partial.
    ///
    /// Idempotent and cheap to repeat; used by the periodic loop and by
    /// `force_aggregate`.
    pub async fn aggregate_due(&self, model_id: &str) -> Result<Vec<WindowedMetric>, MonitorError> {
        self.aggregate_due_at(model_id, crate::now_ms()).await
    }

    pub(crate) async fn aggregate_due_at(
        &self,
        model_id: &str,
        now_ms: i64,
    ) -> Result<Vec<WindowedMetric>, MonitorError> {
        let started = Instant::now();
        let window_ms = self.config.window_ms();

        let shard = self.store.shard(model_id)?;
        let mut state = shard.write().await;

        let last_final = state
            .windows
            .values()
            .filter(|w| !w.is_partial)
            .map(|w| w.window_start_ms)
            .max();
        let earliest_event = state.events.iter().map(|e| e.timestamp_ms).min();

        let mut start = match (last_final, earliest_event) {
            (Some(last), _) => last + window_ms,
            (None, Some(ts)) => self.config.window_start_for(ts),
            (None, None) => return Ok(Vec::new()),
        };

        // Never walk further back than retention; anything older would
        // be pruned immediately anyway.
        let retention_ms = self.store.config().retention.as_millis() as i64;
        let horizon = self.config.window_start_for(now_ms - retention_ms);
        if start < horizon {
            start = horizon;
        }

        let current = self.config.window_start_for(now_ms);
        let mut upserted = Vec::new();
        let mut finalized = 0u64;

        while start <= current {
            let end = start + window_ms;
            let is_partial = now_ms < end + self.config.grace_ms();
            let events = state.events_in(start, end);
            let metric = WindowedMetric::from_events(model_id, start, end, &events, is_partial);
            if !is_partial {
                finalized += 1;
            }
            state.set_window(metric.clone());
            upserted.push(metric);
            start += window_ms;
        }

        if !upserted.is_empty() {
            state.persist_windows()?;
        }
        if finalized > 0 {
            self.metrics.add_windows_finalized(finalized);
        }
        self.metrics
            .observe_aggregation_latency(started.elapsed().as_secs_f64());

        debug!(
            model_id = %model_id,
            upserted = upserted.len(),
            finalized,
            "Aggregation pass complete"
        );
        Ok(upserted)
    }
}
