use crate::error::{AppError, Result};
use crate::models::IncidentEvent;
use crate::state::IncidentSource;
use async_trait::async_trait;
use sled::Db;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Persistent incident log using the Sled embedded database.
///
/// Keys are the big-endian timestamp (sign bit flipped so negative epochs sort
/// first) followed by the event id, so a forward scan yields events in
/// chronological order.
#[derive(Clone)]
pub struct SledIncidentSource {
    db: Arc<Db>,
    events_tree: sled::Tree,
}

impl SledIncidentSource {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| {
            AppError::Storage(format!("Failed to open Sled database: {}", e))
        })?;

        let events_tree = db.open_tree("incident_events").map_err(|e| {
            AppError::Storage(format!("Failed to open incident_events tree: {}", e))
        })?;

        tracing::info!("Initialized Sled incident source at {:?}", path_ref);

        Ok(Self {
            db: Arc::new(db),
            events_tree,
        })
    }

    fn event_key(event: &IncidentEvent) -> Vec<u8> {
        let micros = event.timestamp.timestamp_micros() as u64 ^ (1u64 << 63);
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&micros.to_be_bytes());
        key.extend_from_slice(event.id.as_bytes());
        key
    }

    fn serialize_event(event: &IncidentEvent) -> Result<Vec<u8>> {
        bincode::serialize(event).map_err(|e| {
            AppError::Serialization(format!("Failed to serialize incident event: {}", e))
        })
    }

    fn deserialize_event(bytes: &[u8]) -> Result<IncidentEvent> {
        bincode::deserialize(bytes).map_err(|e| {
            AppError::Serialization(format!("Failed to deserialize incident event: {}", e))
        })
    }

    /// Import events; re-importing the same event id is a no-op
    pub fn append(&self, events: &[IncidentEvent]) -> Result<usize> {
        let mut batch = sled::Batch::default();
        for event in events {
            batch.insert(Self::event_key(event), Self::serialize_event(event)?);
        }
        self.events_tree.apply_batch(batch).map_err(|e| {
            AppError::Storage(format!("Failed to write incident events: {}", e))
        })?;

        tracing::debug!(count = events.len(), "Incident events appended");
        Ok(events.len())
    }

    pub fn len(&self) -> usize {
        self.events_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events_tree.is_empty()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Storage(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    fn scan(&self, station: Option<&str>) -> Result<Vec<IncidentEvent>> {
        let mut events = Vec::new();
        for item in self.events_tree.iter() {
            let (_, value) = item.map_err(|e| {
                AppError::Storage(format!("Failed to read incident events: {}", e))
            })?;
            let event = Self::deserialize_event(&value)?;
            if station.map_or(true, |s| event.station == s) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl IncidentSource for SledIncidentSource {
    async fn events(&self, station: Option<&str>) -> Result<Vec<IncidentEvent>> {
        self.scan(station)
    }

    async fn stations(&self) -> Result<Vec<String>> {
        let stations: BTreeSet<String> = self.scan(None)?.into_iter().map(|e| e.station).collect();
        Ok(stations.into_iter().collect())
    }
}
