//! Core data records for the accuracy monitor
//!
//! All four persisted entity types live here, together with their
//! creation-time validation. Timestamps are epoch milliseconds,
//! prediction error is measured in bytes of distance between the
//! predicted and actual block location.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};

/// One observed outcome of a model's lookup prediction.
///
/// Immutable once recorded; the event log is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub model_id: String,
    pub timestamp_ms: i64,
    pub key: u64,
    pub predicted_block: u32,
    pub actual_block: u32,
    pub confidence: f64,
    pub was_correct: bool,
    pub error_bytes: f64,
}

impl PredictionEvent {
    /// Build a validated event. `was_correct` is derived, never supplied.
    ///
    /// Rejected inputs: confidence outside `[0, 1]`, negative or NaN
    /// error, an error of zero for a miss or non-zero for a hit, and an
    /// empty model id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model_id: impl Into<String>,
        key: u64,
        predicted_block: u32,
        actual_block: u32,
        confidence: f64,
        error_bytes: f64,
        timestamp_ms: i64,
    ) -> Result<Self, MonitorError> {
        let model_id = model_id.into();
        if model_id.is_empty() {
            return Err(MonitorError::validation("model_id must not be empty"));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(MonitorError::validation(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        if !error_bytes.is_finite() || error_bytes < 0.0 {
            return Err(MonitorError::validation(format!(
                "error_bytes {} must be finite and non-negative",
                error_bytes
            )));
        }

        let was_correct = predicted_block == actual_block;
        if was_correct && error_bytes != 0.0 {
            return Err(MonitorError::validation(format!(
                "correct prediction reported with error_bytes {}",
                error_bytes
            )));
        }
        if !was_correct && error_bytes == 0.0 {
            return Err(MonitorError::validation(
                "incorrect prediction reported with zero error_bytes",
            ));
        }

        Ok(Self {
            model_id,
            timestamp_ms,
            key,
            predicted_block,
            actual_block,
            confidence,
            was_correct,
            error_bytes,
        })
    }
}

/// Aggregate of prediction events for one model over the half-open
/// interval `[window_start_ms, window_end_ms)`.
///
/// At most one metric exists per `(model_id, window_start_ms)`;
/// recomputation replaces the stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedMetric {
    pub model_id: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub total_predictions: u64,
    pub correct_predictions: u64,
    pub accuracy_rate: f64,
    pub average_confidence: f64,
    pub average_error_bytes: f64,
    pub throughput_qps: f64,
    /// True while the window may still accumulate events. A metric with
    /// `is_partial == false` is finalized and never recomputed.
    pub is_partial: bool,
}

impl WindowedMetric {
    /// Aggregate the given events into a metric for `[start, end)`.
    ///
    /// Events are assumed to already be filtered to the interval. An
    /// empty slice produces a zeroed metric with `accuracy_rate == 0.0`;
    /// `total_predictions == 0` is what distinguishes it from a genuine
    /// 0% accuracy window.
    pub fn from_events(
        model_id: &str,
        window_start_ms: i64,
        window_end_ms: i64,
        events: &[&PredictionEvent],
        is_partial: bool,
    ) -> Self {
        debug_assert!(window_end_ms > window_start_ms);

        let total = events.len() as u64;
        let correct = events.iter().filter(|e| e.was_correct).count() as u64;

        let (accuracy, avg_confidence, avg_error) = if total == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = total as f64;
            (
                correct as f64 / n,
                events.iter().map(|e| e.confidence).sum::<f64>() / n,
                events.iter().map(|e| e.error_bytes).sum::<f64>() / n,
            )
        };

        let window_secs = (window_end_ms - window_start_ms) as f64 / 1000.0;
        let throughput = if window_secs > 0.0 {
            total as f64 / window_secs
        } else {
            0.0
        };

        Self {
            model_id: model_id.to_string(),
            window_start_ms,
            window_end_ms,
            total_predictions: total,
            correct_predictions: correct,
            accuracy_rate: accuracy,
            average_confidence: avg_confidence,
            average_error_bytes: avg_error,
            throughput_qps: throughput,
            is_partial,
        }
    }
}

/// Current health snapshot for one model. Keyed by model id and
/// rewritten on every health update; history lives in the window and
/// retraining tables, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model_id: String,
    pub last_training_timestamp_ms: Option<i64>,
    pub total_queries_served: u64,
    pub current_accuracy: f64,
    /// Signed accuracy change versus the short lookback mean
    /// (default 1 hour), per lookback period.
    pub trend_short: f64,
    /// Same computation over the long lookback (default 7 days).
    pub trend_long: f64,
    pub is_degrading: bool,
    pub needs_retraining: bool,
    /// When `needs_retraining` last transitioned to true. The flag only
    /// clears once a successful retraining newer than this is on the
    /// ledger.
    pub needs_retraining_since_ms: Option<i64>,
    pub last_retrain_timestamp_ms: Option<i64>,
    pub retrain_count: u64,
    pub updated_at_ms: i64,
}

impl ModelHealth {
    /// Derived state for callers that want a single label.
    pub fn state(&self) -> HealthState {
        if self.needs_retraining {
            HealthState::CriticalNeedsRetrain
        } else if self.is_degrading {
            HealthState::Degrading
        } else {
            HealthState::Healthy
        }
    }
}

/// Health label derived from the two flags. `Unknown` is reported for
/// models whose health cannot be computed yet; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degrading,
    CriticalNeedsRetrain,
    Unknown,
}

/// What caused a retraining attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Scheduled,
    AccuracyThreshold,
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Scheduled => "scheduled",
            TriggerReason::AccuracyThreshold => "accuracy_threshold",
            TriggerReason::Manual => "manual",
        }
    }
}

/// Reported result of a retraining attempt, before it is flattened into
/// a ledger record.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrainingOutcome {
    Succeeded { new_accuracy: f64 },
    Failed { error_message: String },
}

/// One retraining attempt. Append-only; the audit trail behind every
/// change to `ModelHealth::retrain_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainingEvent {
    pub model_id: String,
    pub timestamp_ms: i64,
    pub trigger_reason: TriggerReason,
    pub success: bool,
    /// Present iff `success`.
    pub new_accuracy: Option<f64>,
    pub training_sample_count: Option<u64>,
    pub training_duration_ms: Option<u64>,
    /// Present iff `!success`.
    pub error_message: Option<String>,
}

impl RetrainingEvent {
    pub fn new(
        model_id: impl Into<String>,
        timestamp_ms: i64,
        trigger_reason: TriggerReason,
        outcome: RetrainingOutcome,
        training_sample_count: Option<u64>,
        training_duration_ms: Option<u64>,
    ) -> Result<Self, MonitorError> {
        let model_id = model_id.into();
        if model_id.is_empty() {
            return Err(MonitorError::validation("model_id must not be empty"));
        }

        let (success, new_accuracy, error_message) = match outcome {
            RetrainingOutcome::Succeeded { new_accuracy } => {
                if !(0.0..=1.0).contains(&new_accuracy) {
                    return Err(MonitorError::validation(format!(
                        "new_accuracy {} outside [0, 1]",
                        new_accuracy
                    )));
                }
                (true, Some(new_accuracy), None)
            }
            RetrainingOutcome::Failed { error_message } => {
                if error_message.is_empty() {
                    return Err(MonitorError::validation(
                        "failed retraining must carry an error message",
                    ));
                }
                (false, None, Some(error_message))
            }
        };

        Ok(Self {
            model_id,
            timestamp_ms,
            trigger_reason,
            success,
            new_accuracy,
            training_sample_count,
            training_duration_ms,
            error_message,
        })
    }
}
