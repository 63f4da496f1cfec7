use crate::config::CacheConfig;
use crate::error::{AppError, Result};
use crate::metrics::ENGINE_METRICS;
use crate::models::{truncate_to_hour, PredictionRecord};
use crate::state::snapshot;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type CacheKey = (String, DateTime<Utc>);

/// A cached prediction and the moment it turns stale
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub record: PredictionRecord,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One immutable batch of forward predictions
#[derive(Debug, Default)]
pub struct CacheGeneration {
    entries: HashMap<CacheKey, CacheEntry>,
    model_version: Option<String>,
    generated_at: Option<DateTime<Utc>>,
}

impl CacheGeneration {
    pub fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let model_version = entries.first().map(|e| e.record.model_version.clone());
        let generated_at = entries.first().map(|e| e.record.generated_at);
        let entries = entries
            .into_iter()
            .map(|e| ((e.record.station.clone(), e.record.predicted_time), e))
            .collect();

        Self {
            entries,
            model_version,
            generated_at,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.generated_at
    }

    /// Entries ordered by predicted time, then station
    pub fn entries(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.record
                .predicted_time
                .cmp(&b.record.predicted_time)
                .then_with(|| a.record.station.cmp(&b.record.station))
        });
        entries
    }
}

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(PredictionRecord),
    /// Expired entry served as-is while a refresh is requested
    Stale(PredictionRecord),
    Miss,
}

impl CacheLookup {
    pub fn record(&self) -> Option<&PredictionRecord> {
        match self {
            CacheLookup::Fresh(r) | CacheLookup::Stale(r) => Some(r),
            CacheLookup::Miss => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CacheLookup::Fresh(_) => "fresh",
            CacheLookup::Stale(_) => "stale",
            CacheLookup::Miss => "miss",
        }
    }
}

/// Asks the scheduler for a forward refresh after a stale read
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub station: String,
    pub bucket: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
}

/// Forward prediction cache.
///
/// Batch refreshes build a complete [`CacheGeneration`] and swap it in with a
/// single pointer write, so readers see either the old or the new batch.
/// Predictions computed on a miss live in a separate TTL cache and never
/// shadow batch entries.
pub struct PredictionCache {
    config: CacheConfig,
    current: RwLock<Arc<CacheGeneration>>,
    on_demand: Cache<CacheKey, PredictionRecord>,
    refresh_tx: mpsc::Sender<RefreshRequest>,
    refresh_rx: Mutex<Option<mpsc::Receiver<RefreshRequest>>>,
}

impl PredictionCache {
    pub fn new(config: CacheConfig) -> Self {
        let on_demand = Cache::builder()
            .max_capacity(config.on_demand_capacity)
            .time_to_live(config.on_demand_ttl())
            .build();
        // A single slot is enough: one pending refresh covers every stale read
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        Self {
            config,
            current: RwLock::new(Arc::new(CacheGeneration::default())),
            on_demand,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current batch generation
    pub fn generation(&self) -> Arc<CacheGeneration> {
        self.current.read().clone()
    }

    /// Look up the prediction for `station` at the hour bucket containing `bucket`
    pub async fn get(&self, station: &str, bucket: DateTime<Utc>) -> CacheLookup {
        let key = (station.to_string(), truncate_to_hour(bucket));
        let now = Utc::now();

        let lookup = match self.generation().entries.get(&key) {
            Some(entry) if entry.is_expired(now) => {
                self.request_refresh(&key.0, key.1);
                CacheLookup::Stale(entry.record.clone())
            }
            Some(entry) => CacheLookup::Fresh(entry.record.clone()),
            None => match self.on_demand.get(&key).await {
                Some(record) => CacheLookup::Fresh(record),
                None => CacheLookup::Miss,
            },
        };

        ENGINE_METRICS.record_cache_lookup(lookup.label());
        lookup
    }

    /// Replace the forward window with `records`, all expiring after `ttl`
    pub fn put_batch(&self, records: Vec<PredictionRecord>, ttl: Duration) -> usize {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let entries = records
            .into_iter()
            .map(|record| CacheEntry { record, expires_at })
            .collect();
        self.swap(CacheGeneration::from_entries(entries))
    }

    fn swap(&self, generation: CacheGeneration) -> usize {
        let count = generation.len();
        let version = generation.model_version.clone();
        *self.current.write() = Arc::new(generation);
        // Batch entries are newer than anything computed on demand
        self.on_demand.invalidate_all();

        ENGINE_METRICS.cached_predictions.set(count as f64);
        debug!(count = count, model_version = ?version, "Prediction batch swapped in");
        count
    }

    /// Store a prediction computed on a cache miss
    pub async fn insert_on_demand(&self, record: PredictionRecord) {
        let key = (record.station.clone(), record.predicted_time);
        self.on_demand.insert(key, record).await;
    }

    /// Batch records with `from <= predicted_time < from + horizon_hours`
    pub fn forward_window(&self, from: DateTime<Utc>, horizon_hours: u32) -> Vec<PredictionRecord> {
        let start = truncate_to_hour(from);
        let end = start + ChronoDuration::hours(horizon_hours as i64);
        self.generation()
            .entries()
            .into_iter()
            .filter(|e| e.record.predicted_time >= start && e.record.predicted_time < end)
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn request_refresh(&self, station: &str, bucket: DateTime<Utc>) {
        let request = RefreshRequest {
            station: station.to_string(),
            bucket,
            requested_at: Utc::now(),
        };
        match self.refresh_tx.try_send(request) {
            Ok(()) => debug!(station = station, bucket = %bucket, "Stale read queued a refresh"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(station = station, "Refresh already pending")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(station = station, "No refresh listener attached")
            }
        }
    }

    /// Receiver of refresh requests raised by stale reads. Can be taken once.
    pub fn take_refresh_receiver(&self) -> Option<mpsc::Receiver<RefreshRequest>> {
        self.refresh_rx.lock().take()
    }

    /// Write the current generation to the snapshot file
    pub fn snapshot_to_storage(&self) -> Result<usize> {
        let generation = self.generation();
        let entries: Vec<CacheEntry> = generation.entries().into_iter().cloned().collect();
        snapshot::write_snapshot(&self.config.snapshot_path, &entries)?;

        debug!(
            path = %self.config.snapshot_path.display(),
            count = entries.len(),
            "Prediction cache snapshot written"
        );
        Ok(entries.len())
    }

    /// `snapshot_to_storage` on a blocking worker, for callers on the runtime
    pub async fn snapshot_async(self: &Arc<Self>) -> Result<usize> {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.snapshot_to_storage())
            .await
            .map_err(|e| AppError::Internal(format!("snapshot writer aborted: {}", e)))?
    }

    /// Load the snapshot file into the cache. A missing or corrupt file
    /// leaves the cache empty.
    pub fn restore_from_storage(&self) -> usize {
        let path = &self.config.snapshot_path;
        match snapshot::read_snapshot(path) {
            Ok(Some(entries)) => {
                let count = self.swap(CacheGeneration::from_entries(entries));
                info!(path = %path.display(), count = count, "Prediction cache restored from snapshot");
                count
            }
            Ok(None) => {
                info!(path = %path.display(), "No prediction cache snapshot found, starting empty");
                0
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding prediction cache snapshot");
                self.swap(CacheGeneration::default());
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentType, PredictionSource, RiskEstimate};
    use chrono::TimeZone;

    fn record(station: &str, at: DateTime<Utc>, version: &str) -> PredictionRecord {
        PredictionRecord::new(
            station,
            at,
            RiskEstimate::new(0.5, IncidentType::Theft),
            Utc::now(),
            version,
            PredictionSource::Model,
        )
    }

    fn cache() -> PredictionCache {
        PredictionCache::new(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_hit_and_miss() {
        let cache = cache();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        cache.put_batch(vec![record("Calle 26", at, "v1")], Duration::from_secs(60));

        // Lookups truncate to the hour bucket
        let lookup = cache.get("Calle 26", at + ChronoDuration::minutes(30)).await;
        assert!(matches!(lookup, CacheLookup::Fresh(_)));
        assert_eq!(cache.get("Ricaurte", at).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_stale_read_returns_value_and_requests_refresh() {
        let cache = cache();
        let mut requests = cache.take_refresh_receiver().unwrap();
        assert!(cache.take_refresh_receiver().is_none());

        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        cache.put_batch(vec![record("Calle 26", at, "v1")], Duration::ZERO);

        match cache.get("Calle 26", at).await {
            CacheLookup::Stale(r) => assert_eq!(r.model_version, "v1"),
            other => panic!("expected stale entry, got {:?}", other),
        }
        // Second stale read coalesces into the pending request
        cache.get("Calle 26", at).await;

        let request = requests.try_recv().unwrap();
        assert_eq!(request.station, "Calle 26");
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_replaces_whole_window() {
        let cache = cache();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        cache.put_batch(
            vec![record("Calle 26", at, "v1"), record("Ricaurte", at, "v1")],
            Duration::from_secs(60),
        );
        cache.put_batch(vec![record("Calle 26", at, "v2")], Duration::from_secs(60));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.generation().model_version(), Some("v2"));
        assert_eq!(cache.get("Ricaurte", at).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_on_demand_entries() {
        let cache = cache();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        cache.insert_on_demand(record("Portal Sur", at, "heuristic")).await;

        assert!(matches!(cache.get("Portal Sur", at).await, CacheLookup::Fresh(_)));
        // On-demand entries do not count toward the batch window
        assert!(cache.is_empty());
    }

    #[test]
    fn test_forward_window_bounds() {
        let cache = cache();
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let records = (0..6)
            .map(|h| record("Calle 26", base + ChronoDuration::hours(h), "v1"))
            .collect();
        cache.put_batch(records, Duration::from_secs(60));

        let window = cache.forward_window(base + ChronoDuration::minutes(20), 3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].predicted_time, base);
        assert_eq!(window[2].predicted_time, base + ChronoDuration::hours(2));
    }
}
