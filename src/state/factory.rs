use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{IncidentSource, InMemoryIncidentSource, SledIncidentSource};
use std::sync::Arc;

/// Create an incident source based on configuration
pub fn create_source(config: &StateConfig) -> Result<Arc<dyn IncidentSource>> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled incident source");

            let source = SledIncidentSource::new(path)?;
            Ok(Arc::new(source))
        }

        StateBackend::Memory => Ok(create_in_memory_source()),
    }
}

/// Create an empty in-memory source (for testing and development)
pub fn create_in_memory_source() -> Arc<dyn IncidentSource> {
    tracing::info!("Initializing in-memory incident source");
    Arc::new(InMemoryIncidentSource::new())
}
