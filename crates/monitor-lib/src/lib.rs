//! Core library for learned-index model accuracy monitoring
//!
//! This crate provides the pipeline that:
//! - Records individual prediction outcomes per model
//! - Folds them into fixed-width windowed metrics
//! - Derives per-model health with short- and long-term accuracy trends
//! - Logs retraining attempts and their effect on health
//! - Serves read-side queries for dashboards and operators

pub mod aggregator;
pub mod error;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod probes;
pub mod query;
pub mod recorder;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;

pub use aggregator::{AggregationConfig, WindowAggregator};
pub use error::MonitorError;
pub use ledger::{RetrainingLedger, RetrainingStats};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use probes::{ComponentProbe, ComponentStatus, ProbeRegistry, ProbeReport, ReadinessReport};
pub use query::{QueryConfig, QueryService};
pub use recorder::EventRecorder;
pub use scheduler::{LoopConfig, MonitorLoop};
pub use service::{MonitorService, MonitorSettings, MonitorStatus};
pub use store::{MetricsStore, StoreConfig};
pub use tracker::{HealthThresholds, HealthTracker};

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
