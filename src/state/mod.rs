pub mod cache;
pub mod factory;
pub mod sled_store;
pub mod snapshot;
pub mod store;

pub use cache::{CacheEntry, CacheGeneration, CacheLookup, PredictionCache, RefreshRequest};
pub use factory::{create_in_memory_source, create_source};
pub use sled_store::SledIncidentSource;
pub use store::InMemoryIncidentSource;

use crate::error::Result;
use crate::models::IncidentEvent;
use async_trait::async_trait;

/// Read-only access to the incident log
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Events for one station, or for all stations, ascending by timestamp
    async fn events(&self, station: Option<&str>) -> Result<Vec<IncidentEvent>>;

    /// Distinct stations that have at least one event, sorted
    async fn stations(&self) -> Result<Vec<String>>;
}
