//! Data-free fallback model.
//!
//! Risk comes from a fixed hour-of-day policy table scaled by a weekday or
//! weekend multiplier. The incident type is a weighted draw from an
//! hour-conditioned table, using a generator seeded from the configured seed
//! and the (station, hour, day) input so repeated calls agree.

use crate::ml::classifier::RiskModel;
use crate::ml::models::{ModelArtifact, TrainingDiagnostics, TrainingStatus};
use crate::ml::sequence::Sequence;
use crate::models::{IncidentType, RiskEstimate};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Base risk by hour of day
pub fn base_risk(hour: u32) -> f64 {
    match hour {
        0..=4 => 0.70,
        5 => 0.55,
        6..=9 => 0.60,
        10..=15 => 0.35,
        16..=19 => 0.60,
        20..=21 => 0.50,
        _ => 0.65,
    }
}

/// Weekday = 1.0, weekend = 0.8 (Monday = 0)
pub fn day_multiplier(day_of_week: u32) -> f64 {
    if day_of_week >= 5 {
        0.8
    } else {
        1.0
    }
}

fn is_commute_hour(hour: u32) -> bool {
    (6..=9).contains(&hour) || (17..=20).contains(&hour)
}

fn is_night_hour(hour: u32) -> bool {
    hour >= 22 || hour <= 4
}

/// Hour-conditioned incident-type weights
pub fn type_weights(hour: u32) -> Vec<(IncidentType, f64)> {
    let mut weights = vec![
        (IncidentType::Theft, 0.30),
        (IncidentType::Pickpocketing, 0.20),
        (IncidentType::ArmedTheft, 0.10),
        (IncidentType::Harassment, 0.15),
        (IncidentType::SuspiciousActivity, 0.10),
        (IncidentType::Assault, 0.10),
        (IncidentType::DoorForcing, 0.05),
    ];

    for (incident_type, weight) in weights.iter_mut() {
        let factor = match incident_type {
            IncidentType::Theft if is_commute_hour(hour) => 1.2,
            IncidentType::Pickpocketing if is_commute_hour(hour) => 1.3,
            IncidentType::ArmedTheft if is_night_hour(hour) => 1.5,
            IncidentType::Assault if is_night_hour(hour) => 1.2,
            _ => 1.0,
        };
        *weight *= factor;
    }
    weights
}

/// Weighted choice over `weights` drawing from `rng`.
///
/// Falls back to the heaviest entry when the weights cannot form a
/// distribution (empty, all zero, or non-finite).
pub fn weighted_choice<R: Rng + ?Sized>(weights: &[(IncidentType, f64)], rng: &mut R) -> IncidentType {
    match WeightedIndex::new(weights.iter().map(|(_, w)| *w)) {
        Ok(dist) => weights[dist.sample(rng)].0,
        Err(_) => weights
            .iter()
            .filter(|(_, w)| w.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(t, _)| *t)
            .unwrap_or(IncidentType::Theft),
    }
}

/// FNV-1a over the prediction input, mixed with the configured seed
fn input_seed(seed: u64, station: &str, hour: u32, day_of_week: u32) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    let bytes = station
        .as_bytes()
        .iter()
        .copied()
        .chain([0xff, hour as u8, day_of_week as u8]);
    for byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash ^ seed
}

/// Total fallback model: answers for every station and hour
#[derive(Debug, Clone)]
pub struct HeuristicFallbackModel {
    seed: u64,
}

impl HeuristicFallbackModel {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Score an explicit (hour, day_of_week) pair
    pub fn estimate(&self, station: &str, hour: u32, day_of_week: u32) -> RiskEstimate {
        let hour = hour % 24;
        let day_of_week = day_of_week % 7;
        let risk = base_risk(hour) * day_multiplier(day_of_week);

        let mut rng = StdRng::seed_from_u64(input_seed(self.seed, station, hour, day_of_week));
        let incident_type = weighted_choice(&type_weights(hour), &mut rng);

        RiskEstimate::new(risk, incident_type)
    }
}

impl RiskModel for HeuristicFallbackModel {
    fn train(&mut self, sequences: &[Sequence]) -> (Option<ModelArtifact>, TrainingDiagnostics) {
        (
            None,
            TrainingDiagnostics::started(sequences.len())
                .fail(TrainingStatus::Failed, "heuristic model has no trainable state"),
        )
    }

    fn predict(&self, station: &str, at: DateTime<Utc>) -> Option<RiskEstimate> {
        Some(self.estimate(
            station,
            at.hour(),
            at.weekday().num_days_from_monday(),
        ))
    }
}
