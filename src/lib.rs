//! Station risk prediction and caching engine.
//!
//! Incident reports are bucketed into hourly feature records, windowed into
//! training sequences and used to train a per-station risk model. A
//! deterministic heuristic answers whenever the trained model cannot. Forward
//! predictions are refreshed on a schedule into an atomically swapped cache
//! and published to notification emitters.

pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use ml::PredictionService;
