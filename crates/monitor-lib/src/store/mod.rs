//! Durable, sharded metrics store
//!
//! The store is the only shared mutable resource in the pipeline and
//! the explicit owner of all four record types. It is constructed once
//! at startup and handed (as an `Arc`) to every component; nothing else
//! holds authoritative state across restarts.
//!
//! Sharding: one `ModelShard` per model id, held in a `DashMap`, each
//! guarding its records with a `tokio::sync::RwLock`. Operations on
//! different models never contend; writers to the same model serialize
//! on the shard lock.

mod persist;

use crate::error::MonitorError;
use crate::models::{ModelHealth, PredictionEvent, RetrainingEvent, WindowedMetric};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Default in-memory retention for raw events (the long health lookback
/// plus one hour of slack). The on-disk logs keep everything.
const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60 + 3600);

/// Configuration for the metrics store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for per-model data.
    pub data_dir: PathBuf,
    /// How long raw events and windows stay queryable in memory.
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/index-monitor/data"),
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Outcome of appending a prediction event.
#[derive(Debug, Clone, Copy)]
pub struct EventAppended {
    /// Monotonic count of events ever recorded for the model.
    pub total_queries_served: u64,
    /// The event landed inside a window that was already finalized; it
    /// is on the log but will not be folded into that window.
    pub late: bool,
}

/// All records for one model, guarded by the shard lock.
pub(crate) struct ShardState {
    dir: PathBuf,
    /// Raw events within the retention horizon, in arrival order.
    /// Timestamps are not necessarily monotonic.
    pub(crate) events: Vec<PredictionEvent>,
    /// Windows keyed by `window_start_ms`.
    pub(crate) windows: BTreeMap<i64, WindowedMetric>,
    pub(crate) health: Option<ModelHealth>,
    /// Retraining ledger in append order.
    pub(crate) retraining: Vec<RetrainingEvent>,
    /// Count of events ever appended, including those pruned from
    /// memory. Restored from the full log length on startup.
    pub(crate) queries_served: u64,
    events_log: File,
    retraining_log: File,
}

impl ShardState {
    /// True if `timestamp_ms` falls inside an already-finalized window.
    pub(crate) fn lands_in_finalized_window(&self, timestamp_ms: i64) -> bool {
        self.windows
            .range(..=timestamp_ms)
            .next_back()
            .map(|(_, w)| !w.is_partial && timestamp_ms < w.window_end_ms)
            .unwrap_or(false)
    }

    /// Append an event to the durable log and the in-memory set.
    pub(crate) fn append_event(
        &mut self,
        event: &PredictionEvent,
    ) -> Result<EventAppended, MonitorError> {
        let late = self.lands_in_finalized_window(event.timestamp_ms);
        persist::append_record(&mut self.events_log, event)?;
        self.events.push(event.clone());
        self.queries_served += 1;
        Ok(EventAppended {
            total_queries_served: self.queries_served,
            late,
        })
    }

    pub(crate) fn append_retraining(
        &mut self,
        event: &RetrainingEvent,
    ) -> Result<(), MonitorError> {
        persist::append_record(&mut self.retraining_log, event)?;
        self.retraining.push(event.clone());
        Ok(())
    }

    /// Upsert a window in memory only; call [`persist_windows`] once the
    /// batch is complete.
    ///
    /// [`persist_windows`]: ShardState::persist_windows
    pub(crate) fn set_window(&mut self, metric: WindowedMetric) {
        self.windows.insert(metric.window_start_ms, metric);
    }

    pub(crate) fn persist_windows(&self) -> Result<(), MonitorError> {
        let snapshot: Vec<&WindowedMetric> = self.windows.values().collect();
        persist::save_snapshot(&self.dir.join(persist::WINDOWS_SNAPSHOT), &snapshot)
    }

    pub(crate) fn put_health(&mut self, health: ModelHealth) -> Result<(), MonitorError> {
        persist::save_snapshot(&self.dir.join(persist::HEALTH_SNAPSHOT), &health)?;
        self.health = Some(health);
        Ok(())
    }

    /// Events with `timestamp_ms` in `[start, end)`.
    pub(crate) fn events_in(&self, start_ms: i64, end_ms: i64) -> Vec<&PredictionEvent> {
        self.events
            .iter()
            .filter(|e| e.timestamp_ms >= start_ms && e.timestamp_ms < end_ms)
            .collect()
    }

    /// Drop in-memory events older than `event_cutoff_ms` and windows
    /// that ended before `window_cutoff_ms`. The on-disk logs are never
    /// touched; the window snapshot is rewritten if anything fell off.
    pub(crate) fn prune(
        &mut self,
        event_cutoff_ms: i64,
        window_cutoff_ms: i64,
    ) -> Result<(usize, usize), MonitorError> {
        let events_before = self.events.len();
        self.events.retain(|e| e.timestamp_ms >= event_cutoff_ms);
        let events_pruned = events_before - self.events.len();

        let windows_before = self.windows.len();
        self.windows.retain(|_, w| w.window_end_ms > window_cutoff_ms);
        let windows_pruned = windows_before - self.windows.len();
        if windows_pruned > 0 {
            self.persist_windows()?;
        }

        Ok((events_pruned, windows_pruned))
    }
}

/// One model's shard: the lock around its records.
pub(crate) struct ModelShard {
    state: RwLock<ShardState>,
}

impl ModelShard {
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, ShardState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, ShardState> {
        self.state.write().await
    }
}

/// The durable store over every tracked model.
pub struct MetricsStore {
    config: StoreConfig,
    shards: DashMap<String, Arc<ModelShard>>,
}

impl MetricsStore {
    /// Open the store, creating the data dir if needed and rehydrating
    /// every model directory found in it.
    pub fn open(config: StoreConfig) -> Result<Self, MonitorError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Self {
            shards: DashMap::new(),
            config,
        };

        let now_ms = crate::now_ms();
        for entry in std::fs::read_dir(&store.config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            let Some(model_id) = persist::decode_model_id(&dir_name) else {
                warn!(dir = %dir_name, "Skipping undecodable model directory");
                continue;
            };
            let state = store.load_shard(&model_id, now_ms)?;
            store.shards.insert(
                model_id,
                Arc::new(ModelShard {
                    state: RwLock::new(state),
                }),
            );
        }

        info!(
            data_dir = %store.config.data_dir.display(),
            models = store.shards.len(),
            "Metrics store opened"
        );
        Ok(store)
    }

    fn load_shard(&self, model_id: &str, now_ms: i64) -> Result<ShardState, MonitorError> {
        let dir = persist::model_dir(&self.config.data_dir, model_id);
        let all_events: Vec<PredictionEvent> = persist::load_log(&dir.join(persist::EVENTS_LOG))?;
        let queries_served = all_events.len() as u64;

        let retention_ms = self.config.retention.as_millis() as i64;
        let cutoff = now_ms - retention_ms;
        let events: Vec<PredictionEvent> = all_events
            .into_iter()
            .filter(|e| e.timestamp_ms >= cutoff)
            .collect();

        let windows: BTreeMap<i64, WindowedMetric> =
            persist::load_snapshot::<Vec<WindowedMetric>>(&dir.join(persist::WINDOWS_SNAPSHOT))?
                .unwrap_or_default()
                .into_iter()
                .map(|w| (w.window_start_ms, w))
                .collect();

        let health = persist::load_snapshot(&dir.join(persist::HEALTH_SNAPSHOT))?;
        let retraining = persist::load_log(&dir.join(persist::RETRAINING_LOG))?;

        debug!(
            model_id = %model_id,
            events = events.len(),
            windows = windows.len(),
            queries_served,
            "Rehydrated model shard"
        );

        Ok(ShardState {
            events_log: persist::open_log(&dir.join(persist::EVENTS_LOG))?,
            retraining_log: persist::open_log(&dir.join(persist::RETRAINING_LOG))?,
            dir,
            events,
            windows,
            health,
            retraining,
            queries_served,
        })
    }

    /// Shard lookup for read paths; unknown models are an error.
    pub(crate) fn shard(&self, model_id: &str) -> Result<Arc<ModelShard>, MonitorError> {
        self.shards
            .get(model_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::not_found(model_id))
    }

    /// Shard lookup for write paths; creates the shard (and its
    /// directory) on first use.
    pub(crate) fn ensure_shard(&self, model_id: &str) -> Result<Arc<ModelShard>, MonitorError> {
        if let Some(entry) = self.shards.get(model_id) {
            return Ok(entry.value().clone());
        }

        let dir = persist::model_dir(&self.config.data_dir, model_id);
        std::fs::create_dir_all(&dir)?;
        let state = ShardState {
            events_log: persist::open_log(&dir.join(persist::EVENTS_LOG))?,
            retraining_log: persist::open_log(&dir.join(persist::RETRAINING_LOG))?,
            dir,
            events: Vec::new(),
            windows: BTreeMap::new(),
            health: None,
            retraining: Vec::new(),
            queries_served: 0,
        };

        let shard = Arc::new(ModelShard {
            state: RwLock::new(state),
        });
        // A concurrent ensure_shard may have won the race; keep the
        // entry that made it into the map.
        let entry = self
            .shards
            .entry(model_id.to_string())
            .or_insert_with(|| shard);
        Ok(entry.value().clone())
    }

    /// Every model with any durable state, sorted for stable output.
    pub fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.shards.iter().map(|e| e.key().clone()).collect();
        models.sort();
        models
    }

    pub fn contains_model(&self, model_id: &str) -> bool {
        self.shards.contains_key(model_id)
    }

    /// Append one validated event to the model's durable log.
    pub async fn append_event(
        &self,
        event: &PredictionEvent,
    ) -> Result<EventAppended, MonitorError> {
        let shard = self.ensure_shard(&event.model_id)?;
        let mut state = shard.write().await;
        state.append_event(event)
    }

    /// Stored windows overlapping `[since_ms, until_ms)`, ascending by
    /// window start.
    pub async fn windows_in(
        &self,
        model_id: &str,
        since_ms: i64,
        until_ms: i64,
    ) -> Result<Vec<WindowedMetric>, MonitorError> {
        let shard = self.shard(model_id)?;
        let state = shard.read().await;
        Ok(state
            .windows
            .values()
            .filter(|w| w.window_end_ms > since_ms && w.window_start_ms < until_ms)
            .cloned()
            .collect())
    }

    /// The stored health row, or `None` if health has never been
    /// computed. Unknown models are `NotFound`.
    pub async fn health_row(&self, model_id: &str) -> Result<Option<ModelHealth>, MonitorError> {
        let shard = self.shard(model_id)?;
        let state = shard.read().await;
        Ok(state.health.clone())
    }

    /// Retraining events with `timestamp_ms >= since_ms`, ascending.
    pub async fn retraining_since(
        &self,
        model_id: &str,
        since_ms: i64,
    ) -> Result<Vec<RetrainingEvent>, MonitorError> {
        let shard = self.shard(model_id)?;
        let state = shard.read().await;
        let mut events: Vec<RetrainingEvent> = state
            .retraining
            .iter()
            .filter(|e| e.timestamp_ms >= since_ms)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp_ms);
        Ok(events)
    }

    pub async fn queries_served(&self, model_id: &str) -> Result<u64, MonitorError> {
        let shard = self.shard(model_id)?;
        let state = shard.read().await;
        Ok(state.queries_served)
    }

    /// Maintenance: drop in-memory events and stored windows past the
    /// retention horizon. Returns (events, windows) pruned.
    pub async fn prune_model(&self, model_id: &str) -> Result<(usize, usize), MonitorError> {
        let cutoff = crate::now_ms() - self.config.retention.as_millis() as i64;
        let shard = self.shard(model_id)?;
        let mut state = shard.write().await;
        state.prune(cutoff, cutoff)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}
