//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics for the pipeline stages (ingest latency,
//!   aggregation latency, late events, retraining outcomes)
//! - Structured JSON logging with tracing for significant domain events

use crate::models::RetrainingEvent;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    record_latency_seconds: Histogram,
    aggregation_latency_seconds: Histogram,
    events_recorded_total: IntCounter,
    validation_failures_total: IntCounter,
    late_events_total: IntCounter,
    windows_finalized_total: IntCounter,
    health_updates_total: IntCounter,
    retraining_attempts_total: IntCounterVec,
    cycle_errors_total: IntCounter,
    models_tracked: IntGauge,
    models_needing_retraining: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            record_latency_seconds: register_histogram!(
                "index_monitor_record_latency_seconds",
                "Time spent durably recording one prediction outcome",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register record_latency_seconds"),

            aggregation_latency_seconds: register_histogram!(
                "index_monitor_aggregation_latency_seconds",
                "Time spent aggregating windows for one model",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register aggregation_latency_seconds"),

            events_recorded_total: register_int_counter!(
                "index_monitor_events_recorded_total",
                "Total prediction outcomes accepted into the event log"
            )
            .expect("Failed to register events_recorded_total"),

            validation_failures_total: register_int_counter!(
                "index_monitor_validation_failures_total",
                "Total prediction outcomes rejected by validation"
            )
            .expect("Failed to register validation_failures_total"),

            late_events_total: register_int_counter!(
                "index_monitor_late_events_total",
                "Events accepted into the log after their window was finalized"
            )
            .expect("Failed to register late_events_total"),

            windows_finalized_total: register_int_counter!(
                "index_monitor_windows_finalized_total",
                "Windowed metrics finalized across all models"
            )
            .expect("Failed to register windows_finalized_total"),

            health_updates_total: register_int_counter!(
                "index_monitor_health_updates_total",
                "Model health recomputations performed"
            )
            .expect("Failed to register health_updates_total"),

            retraining_attempts_total: register_int_counter_vec!(
                "index_monitor_retraining_attempts_total",
                "Retraining attempts recorded on the ledger",
                &["outcome", "trigger"]
            )
            .expect("Failed to register retraining_attempts_total"),

            cycle_errors_total: register_int_counter!(
                "index_monitor_cycle_errors_total",
                "Per-model failures in the periodic monitor loop"
            )
            .expect("Failed to register cycle_errors_total"),

            models_tracked: register_int_gauge!(
                "index_monitor_models_tracked",
                "Number of models with durable state"
            )
            .expect("Failed to register models_tracked"),

            models_needing_retraining: register_int_gauge!(
                "index_monitor_models_needing_retraining",
                "Number of models currently flagged for retraining"
            )
            .expect("Failed to register models_needing_retraining"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_record_latency(&self, duration_secs: f64) {
        self.inner().record_latency_seconds.observe(duration_secs);
    }

    pub fn observe_aggregation_latency(&self, duration_secs: f64) {
        self.inner()
            .aggregation_latency_seconds
            .observe(duration_secs);
    }

    pub fn inc_events_recorded(&self) {
        self.inner().events_recorded_total.inc();
    }

    pub fn inc_validation_failures(&self) {
        self.inner().validation_failures_total.inc();
    }

    pub fn inc_late_events(&self) {
        self.inner().late_events_total.inc();
    }

    pub fn add_windows_finalized(&self, count: u64) {
        self.inner().windows_finalized_total.inc_by(count);
    }

    pub fn inc_health_updates(&self) {
        self.inner().health_updates_total.inc();
    }

    pub fn inc_retraining_attempts(&self, outcome: &str, trigger: &str) {
        self.inner()
            .retraining_attempts_total
            .with_label_values(&[outcome, trigger])
            .inc();
    }

    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors_total.inc();
    }

    pub fn set_models_tracked(&self, count: i64) {
        self.inner().models_tracked.set(count);
    }

    pub fn set_models_needing_retraining(&self, count: i64) {
        self.inner().models_needing_retraining.set(count);
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for health transitions,
/// retraining outcomes, and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a model entering the degrading state
    pub fn log_degradation_detected(&self, model_id: &str, accuracy: f64, trend_short: f64) {
        warn!(
            event = "degradation_detected",
            instance = %self.instance,
            model_id = %model_id,
            current_accuracy = accuracy,
            trend_short = trend_short,
            "Model accuracy is degrading"
        );
    }

    /// Log a model crossing the retraining floor
    pub fn log_retraining_needed(&self, model_id: &str, accuracy: f64) {
        warn!(
            event = "retraining_needed",
            instance = %self.instance,
            model_id = %model_id,
            current_accuracy = accuracy,
            "Model flagged for retraining"
        );
    }

    /// Log a model returning to healthy after retraining
    pub fn log_health_recovered(&self, model_id: &str, accuracy: f64) {
        info!(
            event = "health_recovered",
            instance = %self.instance,
            model_id = %model_id,
            current_accuracy = accuracy,
            "Model health recovered"
        );
    }

    /// Log a retraining attempt and its outcome
    pub fn log_retraining_outcome(&self, event: &RetrainingEvent) {
        if event.success {
            info!(
                event = "retraining_recorded",
                instance = %self.instance,
                model_id = %event.model_id,
                trigger = event.trigger_reason.as_str(),
                success = true,
                new_accuracy = ?event.new_accuracy,
                training_samples = ?event.training_sample_count,
                training_duration_ms = ?event.training_duration_ms,
                "Retraining attempt succeeded"
            );
        } else {
            warn!(
                event = "retraining_recorded",
                instance = %self.instance,
                model_id = %event.model_id,
                trigger = event.trigger_reason.as_str(),
                success = false,
                error = ?event.error_message,
                "Retraining attempt failed"
            );
        }
    }

    /// Log an event that arrived after its window was finalized
    pub fn log_late_event(&self, model_id: &str, timestamp_ms: i64) {
        warn!(
            event = "late_event",
            instance = %self.instance,
            model_id = %model_id,
            timestamp_ms = timestamp_ms,
            "Event recorded after window finalization; kept on the log but not aggregated"
        );
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            monitor_version = %version,
            "Accuracy monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Accuracy monitor shutting down"
        );
    }
}
