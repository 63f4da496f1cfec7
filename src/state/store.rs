use crate::error::Result;
use crate::models::IncidentEvent;
use crate::state::IncidentSource;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// In-memory incident log (for demos and testing)
#[derive(Clone, Default)]
pub struct InMemoryIncidentSource {
    events: Arc<RwLock<Vec<IncidentEvent>>>,
}

impl InMemoryIncidentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<IncidentEvent>) -> Self {
        let source = Self::new();
        source.extend(events);
        source
    }

    /// Append one event, keeping the log ordered by timestamp
    pub fn add(&self, event: IncidentEvent) {
        let mut events = self.events.write();
        let position = events.partition_point(|e| e.timestamp <= event.timestamp);
        events.insert(position, event);
    }

    pub fn extend(&self, new_events: Vec<IncidentEvent>) {
        let mut events = self.events.write();
        events.extend(new_events);
        // Stable sort keeps arrival order for equal timestamps
        events.sort_by_key(|e| e.timestamp);
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl IncidentSource for InMemoryIncidentSource {
    async fn events(&self, station: Option<&str>) -> Result<Vec<IncidentEvent>> {
        let events = self.events.read();
        Ok(match station {
            Some(station) => events.iter().filter(|e| e.station == station).cloned().collect(),
            None => events.clone(),
        })
    }

    async fn stations(&self) -> Result<Vec<String>> {
        let stations: BTreeSet<String> = self.events.read().iter().map(|e| e.station.clone()).collect();
        Ok(stations.into_iter().collect())
    }
}
