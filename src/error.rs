use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Not enough history to build training sequences
    #[error("Insufficient data: {0}")]
    DataInsufficient(String),

    /// Incident events were handed over out of timestamp order
    #[error("Events out of order at index {index}: {message}")]
    Ordering { index: usize, message: String },

    /// Model training failed
    #[error("Training failed: {0}")]
    TrainingFailure(String),

    /// Cache snapshot could not be parsed or validated
    #[error("Cache snapshot corrupted: {0}")]
    CacheCorruption(String),

    /// Neither the trained model nor the heuristic produced an answer
    #[error("No prediction available for station '{station}' at {bucket}")]
    PredictionUnavailable { station: String, bucket: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Embedded storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notification(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::DataInsufficient(_) => "DATA_INSUFFICIENT",
            AppError::Ordering { .. } => "ORDERING_ERROR",
            AppError::TrainingFailure(_) => "TRAINING_FAILURE",
            AppError::CacheCorruption(_) => "CACHE_CORRUPTION",
            AppError::PredictionUnavailable { .. } => "PREDICTION_UNAVAILABLE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Notification(_) => "NOTIFICATION_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is a data condition that callers recover from with the fallback model
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            AppError::DataInsufficient(_) | AppError::TrainingFailure(_) | AppError::Timeout(_)
        )
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from bincode::Error
impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from sled::Error
impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Conversion from reqwest::Error
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Notification(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
