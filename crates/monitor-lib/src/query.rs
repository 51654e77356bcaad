//! Read-side access to windows, health and the retraining ledger
//!
//! Every query is time-bounded (explicitly or by a defaulted lookback)
//! so response sizes stay bounded; nothing here returns a raw
//! event-level dump, and nothing here mutates any store.

use crate::error::MonitorError;
use crate::models::{ModelHealth, RetrainingEvent, WindowedMetric};
use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::Duration;

/// Default lookbacks applied when the caller does not bound a query.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Window queries default to this lookback (default 24 hours).
    pub default_window_lookback: Duration,
    /// Retraining history defaults to this lookback (default 7 days).
    pub default_retraining_lookback: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_window_lookback: Duration::from_secs(24 * 60 * 60),
            default_retraining_lookback: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Read-only view over the metrics store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<MetricsStore>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(store: Arc<MetricsStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    /// Every model with any durable state, sorted.
    pub fn list_models(&self) -> Vec<String> {
        self.store.known_models()
    }

    /// Windows overlapping `[since_ms, until_ms)`, ascending by window
    /// start. `since_ms` defaults to the configured lookback before
    /// now; `until_ms` defaults to now.
    pub async fn get_windows(
        &self,
        model_id: &str,
        since_ms: Option<i64>,
        until_ms: Option<i64>,
    ) -> Result<Vec<WindowedMetric>, MonitorError> {
        let now = crate::now_ms();
        let since =
            since_ms.unwrap_or(now - self.config.default_window_lookback.as_millis() as i64);
        let until = until_ms.unwrap_or(now);
        self.store.windows_in(model_id, since, until).await
    }

    /// The model's current health row.
    ///
    /// `NotFound` if the model has never reported at all;
    /// `InsufficientData` if it has events but health has not been
    /// computable yet. Neither is ever conflated with a healthy row.
    pub async fn get_health(&self, model_id: &str) -> Result<ModelHealth, MonitorError> {
        match self.store.health_row(model_id).await? {
            Some(health) => Ok(health),
            None => Err(MonitorError::insufficient_data(model_id)),
        }
    }

    /// Retraining attempts at or after `since_ms` (default: the
    /// configured lookback before now), ascending by timestamp.
    pub async fn get_retraining_history(
        &self,
        model_id: &str,
        since_ms: Option<i64>,
    ) -> Result<Vec<RetrainingEvent>, MonitorError> {
        let since = since_ms.unwrap_or(
            crate::now_ms() - self.config.default_retraining_lookback.as_millis() as i64,
        );
        self.store.retraining_since(model_id, since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PredictionEvent, RetrainingOutcome, TriggerReason, WindowedMetric};
    use crate::store::StoreConfig;
    use tempfile::TempDir;

    const WINDOW_MS: i64 = 60_000;

    fn fixture(dir: &TempDir) -> (QueryService, Arc<MetricsStore>) {
        let store = Arc::new(
            MetricsStore::open(StoreConfig {
                data_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(365 * 24 * 3600),
            })
            .unwrap(),
        );
        let query = QueryService::new(store.clone(), QueryConfig::default());
        (query, store)
    }

    fn window(model_id: &str, start_ms: i64, accuracy: f64) -> WindowedMetric {
        WindowedMetric {
            model_id: model_id.to_string(),
            window_start_ms: start_ms,
            window_end_ms: start_ms + WINDOW_MS,
            total_predictions: 100,
            correct_predictions: (accuracy * 100.0) as u64,
            accuracy_rate: accuracy,
            average_confidence: 0.9,
            average_error_bytes: 10.0,
            throughput_qps: 100.0 / 60.0,
            is_partial: false,
        }
    }

    async fn put_window(store: &MetricsStore, metric: WindowedMetric) {
        let shard = store.ensure_shard(&metric.model_id).unwrap();
        let mut state = shard.write().await;
        state.set_window(metric);
        state.persist_windows().unwrap();
    }

    #[tokio::test]
    async fn test_list_models_is_sorted() {
        let dir = TempDir::new().unwrap();
        let (query, store) = fixture(&dir);
        store.ensure_shard("zeta.sst").unwrap();
        store.ensure_shard("alpha.sst").unwrap();

        assert_eq!(
            query.list_models(),
            vec!["alpha.sst".to_string(), "zeta.sst".to_string()]
        );
    }

    #[tokio::test]
    async fn test_get_windows_orders_and_bounds() {
        let dir = TempDir::new().unwrap();
        let (query, store) = fixture(&dir);

        let now = crate::now_ms();
        let recent = now - WINDOW_MS;
        // Insert newest-first to prove ordering comes from the query
        put_window(&store, window("m", recent, 0.95)).await;
        put_window(&store, window("m", recent - WINDOW_MS, 0.93)).await;
        // Two days old: outside the default 24h lookback
        put_window(&store, window("m", now - 48 * 3600 * 1000, 0.80)).await;

        let windows = query.get_windows("m", None, None).await.unwrap();
        assert_eq!(windows.len(), 2);
        assert!(windows[0].window_start_ms < windows[1].window_start_ms);

        // An explicit range reaches the old window
        let windows = query
            .get_windows("m", Some(now - 72 * 3600 * 1000), None)
            .await
            .unwrap();
        assert_eq!(windows.len(), 3);
    }

    #[tokio::test]
    async fn test_get_windows_unknown_model() {
        let dir = TempDir::new().unwrap();
        let (query, _store) = fixture(&dir);

        let result = query.get_windows("ghost", None, None).await;
        assert!(matches!(result, Err(MonitorError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_get_health_distinguishes_unknown_from_uncomputed() {
        let dir = TempDir::new().unwrap();
        let (query, store) = fixture(&dir);

        // Never reported: NotFound
        let result = query.get_health("model-b").await;
        assert!(matches!(result, Err(MonitorError::NotFound { .. })));

        // Has an event but no computed health yet: InsufficientData
        let event = PredictionEvent::new("model-b", 1, 0, 0, 0.9, 0.0, crate::now_ms()).unwrap();
        store.append_event(&event).await.unwrap();
        let result = query.get_health("model-b").await;
        assert!(matches!(result, Err(MonitorError::InsufficientData { .. })));
    }

    #[tokio::test]
    async fn test_get_retraining_history_ascending() {
        let dir = TempDir::new().unwrap();
        let (query, store) = fixture(&dir);

        let now = crate::now_ms();
        let shard = store.ensure_shard("m").unwrap();
        {
            let mut state = shard.write().await;
            for (ts, ok) in [(now - 2_000, false), (now - 1_000, true)] {
                let outcome = if ok {
                    RetrainingOutcome::Succeeded { new_accuracy: 0.95 }
                } else {
                    RetrainingOutcome::Failed {
                        error_message: "oom".to_string(),
                    }
                };
                let event =
                    RetrainingEvent::new("m", ts, TriggerReason::Scheduled, outcome, None, None)
                        .unwrap();
                state.append_retraining(&event).unwrap();
            }
        }

        let history = query.get_retraining_history("m", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp_ms < history[1].timestamp_ms);
        assert!(!history[0].success);
        assert!(history[1].success);
    }
}
