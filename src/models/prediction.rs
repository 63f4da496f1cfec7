use super::incident::IncidentType;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Risk score and most likely incident type for one (station, hour) pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RiskEstimate {
    pub risk_score: f64,
    pub incident_type: IncidentType,
}

impl RiskEstimate {
    /// Build an estimate, clamping the score into [0, 1]
    pub fn new(risk_score: f64, incident_type: IncidentType) -> Self {
        Self {
            risk_score: risk_score.clamp(0.0, 1.0),
            incident_type,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.risk_score.is_finite() && (0.0..=1.0).contains(&self.risk_score)
    }
}

/// Which model produced a prediction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PredictionSource {
    Model,
    #[default]
    Heuristic,
}

/// A cached forward prediction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRecord {
    pub station: String,
    pub predicted_time: DateTime<Utc>,
    pub risk_score: f64,
    pub incident_type: IncidentType,
    pub generated_at: DateTime<Utc>,
    pub model_version: String,
    #[serde(default)]
    pub source: PredictionSource,
}

impl PredictionRecord {
    pub fn new(
        station: impl Into<String>,
        predicted_time: DateTime<Utc>,
        estimate: RiskEstimate,
        generated_at: DateTime<Utc>,
        model_version: impl Into<String>,
        source: PredictionSource,
    ) -> Self {
        Self {
            station: station.into(),
            predicted_time: truncate_to_hour(predicted_time),
            risk_score: estimate.risk_score.clamp(0.0, 1.0),
            incident_type: estimate.incident_type,
            generated_at,
            model_version: model_version.into(),
            source,
        }
    }

    pub fn estimate(&self) -> RiskEstimate {
        RiskEstimate {
            risk_score: self.risk_score,
            incident_type: self.incident_type,
        }
    }

    /// Check the record invariants: bounded score and hour-aligned time
    pub fn validate(&self) -> Result<(), String> {
        if !self.risk_score.is_finite() || !(0.0..=1.0).contains(&self.risk_score) {
            return Err(format!(
                "risk_score {} out of range for station '{}'",
                self.risk_score, self.station
            ));
        }
        if !is_hour_aligned(self.predicted_time) {
            return Err(format!(
                "predicted_time {} is not hour-aligned",
                self.predicted_time
            ));
        }
        if self.station.is_empty() {
            return Err("empty station name".to_string());
        }
        Ok(())
    }
}

/// Zero the minutes, seconds and sub-seconds of a timestamp
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let aligned = secs - secs.rem_euclid(3600);
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(ts)
}

pub fn is_hour_aligned(ts: DateTime<Utc>) -> bool {
    ts.timestamp().rem_euclid(3600) == 0 && ts.timestamp_subsec_nanos() == 0
}

/// First hour bucket at or after `now` whose hour of day is `hour`
pub fn next_occurrence(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let current = truncate_to_hour(now);
    let delta = (hour as i64 - current.hour() as i64).rem_euclid(24);
    current + Duration::hours(delta)
}
