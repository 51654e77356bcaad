//! Prediction outcome ingestion
//!
//! The recorder is the single write path for prediction events: one
//! durable append per call, no waiting on aggregation. Validation
//! happens when the [`PredictionEvent`] is constructed, so by the time
//! an event reaches [`EventRecorder::record`] it is well-formed.

use crate::error::MonitorError;
use crate::models::PredictionEvent;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Append-only writer for prediction outcomes.
#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<MetricsStore>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl EventRecorder {
    pub fn new(store: Arc<MetricsStore>, metrics: MonitorMetrics, logger: StructuredLogger) -> Self {
        Self {
            store,
            metrics,
            logger,
        }
    }

    /// Durably append one prediction outcome and return immediately.
    ///
    /// The event is never folded into windows here; that is the
    /// aggregator's job. An event whose timestamp lands inside an
    /// already-finalized window is still appended to the log (the log
    /// is complete) but is flagged, logged and counted; it will not
    /// appear in that window's aggregate.
    pub async fn record(&self, event: PredictionEvent) -> Result<(), MonitorError> {
        let start = Instant::now();
        let appended = self.store.append_event(&event).await?;

        self.metrics.inc_events_recorded();
        self.metrics
            .observe_record_latency(start.elapsed().as_secs_f64());

        if appended.late {
            self.metrics.inc_late_events();
            self.logger.log_late_event(&event.model_id, event.timestamp_ms);
        } else {
            debug!(
                model_id = %event.model_id,
                timestamp_ms = event.timestamp_ms,
                was_correct = event.was_correct,
                total_queries_served = appended.total_queries_served,
                "Recorded prediction outcome"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn recorder_over(dir: &TempDir) -> (EventRecorder, Arc<MetricsStore>) {
        let store = Arc::new(
            MetricsStore::open(StoreConfig {
                data_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(7 * 24 * 3600),
            })
            .unwrap(),
        );
        let recorder = EventRecorder::new(
            store.clone(),
            MonitorMetrics::new(),
            StructuredLogger::new("test"),
        );
        (recorder, store)
    }

    fn event(model_id: &str, timestamp_ms: i64) -> PredictionEvent {
        PredictionEvent::new(model_id, 3, 1, 1, 0.85, 0.0, timestamp_ms).unwrap()
    }

    #[tokio::test]
    async fn test_record_appends_durably() {
        let dir = TempDir::new().unwrap();
        let (recorder, store) = recorder_over(&dir);
        let now = crate::now_ms();

        recorder.record(event("sst_1.sst", now)).await.unwrap();
        recorder.record(event("sst_1.sst", now + 1)).await.unwrap();

        assert_eq!(store.queries_served("sst_1.sst").await.unwrap(), 2);
        assert!(dir
            .path()
            .join("sst_1.sst")
            .join("events.jsonl")
            .exists());
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let (recorder, store) = recorder_over(&dir);
        let now = crate::now_ms();

        let mut handles = Vec::new();
        for producer in 0..8 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                let model = format!("sst_{}.sst", producer % 2);
                for i in 0..50 {
                    recorder.record(event(&model, now + i)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total = store.queries_served("sst_0.sst").await.unwrap()
            + store.queries_served("sst_1.sst").await.unwrap();
        assert_eq!(total, 8 * 50);
    }
}
