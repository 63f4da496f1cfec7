use crate::error::{AppError, Result};
use crate::models::{truncate_to_hour, IncidentEvent, IncidentType, StationProfile};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commute hours flagged as peak. A fixed policy table, not derived from data.
pub const PEAK_HOURS: [u32; 6] = [6, 7, 8, 17, 18, 19];

pub fn is_peak_hour(hour: u32) -> bool {
    PEAK_HOURS.contains(&hour)
}

/// Monday = 0 ... Sunday = 6
pub fn is_weekend_day(day_of_week: u32) -> bool {
    day_of_week >= 5
}

/// Aggregated incidents for one station during one hour bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRecord {
    pub station: String,
    pub bucket_start: DateTime<Utc>,
    pub hour: u32,
    pub day_of_week: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub is_peak_hour: bool,
    pub incident_type_encoded: usize,
    pub incident_count_in_bucket: u32,
}

impl FeatureRecord {
    fn for_bucket(
        station: String,
        bucket_start: DateTime<Utc>,
        incident_type_encoded: usize,
        incident_count_in_bucket: u32,
    ) -> Self {
        let hour = bucket_start.hour();
        let day_of_week = bucket_start.weekday().num_days_from_monday();
        Self {
            station,
            bucket_start,
            hour,
            day_of_week,
            month: bucket_start.month(),
            is_weekend: is_weekend_day(day_of_week),
            is_peak_hour: is_peak_hour(hour),
            incident_type_encoded,
            incident_count_in_bucket,
        }
    }

    /// An hour in which `station` reported nothing
    pub fn quiet(station: &str, bucket_start: DateTime<Utc>) -> Self {
        Self::for_bucket(station.to_string(), bucket_start, 0, 0)
    }

    pub fn dominant_type(&self) -> IncidentType {
        IncidentType::from_index(self.incident_type_encoded).unwrap_or(IncidentType::Theft)
    }
}

#[derive(Default)]
struct BucketAccumulator {
    count: u32,
    type_counts: [u32; IncidentType::COUNT],
    first_seen: [Option<usize>; IncidentType::COUNT],
}

impl BucketAccumulator {
    fn add(&mut self, incident_type: IncidentType, position: usize) {
        let idx = incident_type.index();
        self.count += 1;
        self.type_counts[idx] += 1;
        if self.first_seen[idx].is_none() {
            self.first_seen[idx] = Some(position);
        }
    }

    /// Most frequent type; ties go to the type reported first
    fn dominant(&self) -> usize {
        (0..IncidentType::COUNT)
            .filter(|&i| self.type_counts[i] > 0)
            .min_by_key(|&i| {
                (
                    std::cmp::Reverse(self.type_counts[i]),
                    self.first_seen[i].unwrap_or(usize::MAX),
                )
            })
            .unwrap_or(0)
    }
}

/// Turns a chronologically ordered incident log into hourly feature records
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate events per (station, hour bucket).
    ///
    /// Events must be sorted ascending by timestamp. The output is ordered by
    /// bucket start, then station.
    pub fn build(&self, events: &[IncidentEvent]) -> Result<Vec<FeatureRecord>> {
        ensure_sorted(events)?;

        let mut buckets: BTreeMap<(DateTime<Utc>, String), BucketAccumulator> = BTreeMap::new();
        for (position, event) in events.iter().enumerate() {
            buckets
                .entry((truncate_to_hour(event.timestamp), event.station.clone()))
                .or_default()
                .add(event.incident_type, position);
        }

        let records = buckets
            .into_iter()
            .map(|((bucket_start, station), acc)| {
                FeatureRecord::for_bucket(station, bucket_start, acc.dominant(), acc.count)
            })
            .collect();

        Ok(records)
    }

    /// Per-station centroid and incident count
    pub fn profiles(&self, events: &[IncidentEvent]) -> BTreeMap<String, StationProfile> {
        let mut sums: BTreeMap<String, (f64, f64, usize)> = BTreeMap::new();
        for event in events {
            let entry = sums.entry(event.station.clone()).or_insert((0.0, 0.0, 0));
            entry.0 += event.latitude;
            entry.1 += event.longitude;
            entry.2 += 1;
        }

        sums.into_iter()
            .map(|(station, (lat, lon, count))| {
                let profile = StationProfile {
                    station: station.clone(),
                    centroid_lat: lat / count as f64,
                    centroid_lon: lon / count as f64,
                    historical_incident_count: count,
                };
                (station, profile)
            })
            .collect()
    }
}

fn ensure_sorted(events: &[IncidentEvent]) -> Result<()> {
    for (index, pair) in events.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(AppError::Ordering {
                index: index + 1,
                message: format!(
                    "event {} at {} precedes previous event at {}",
                    pair[1].id, pair[1].timestamp, pair[0].timestamp
                ),
            });
        }
    }
    Ok(())
}
