use crate::ml::features::FeatureRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A window of consecutive hourly records for one station and the outcome of
/// the hour right after it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sequence {
    pub station: String,
    pub records: Vec<FeatureRecord>,
    pub label: bool,
    pub target_bucket: DateTime<Utc>,
}

/// Slides fixed-length windows over per-station feature records
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    sequence_length: usize,
}

impl SequenceEncoder {
    pub fn new(sequence_length: usize) -> Self {
        Self { sequence_length }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Build every complete window.
    ///
    /// Each station's timeline runs hour by hour from its first bucket to the
    /// newest bucket in `features`; hours without a record are quiet hours
    /// with a zero count. Windows slide over that timeline and the following
    /// hour decides the label. Windows whose following hour lies past the
    /// newest bucket have no known outcome and are dropped.
    pub fn encode(&self, features: &[FeatureRecord]) -> Vec<Sequence> {
        let len = self.sequence_length;
        if len == 0 || features.len() < len {
            return Vec::new();
        }

        let horizon = match features.iter().map(|r| r.bucket_start).max() {
            Some(h) => h,
            None => return Vec::new(),
        };

        let mut by_station: BTreeMap<&str, Vec<&FeatureRecord>> = BTreeMap::new();
        for record in features {
            by_station.entry(record.station.as_str()).or_default().push(record);
        }

        let mut sequences = Vec::new();
        for (station, mut records) in by_station {
            records.sort_by_key(|r| r.bucket_start);
            let timeline = hourly_timeline(station, &records, horizon);

            // The last hour of the timeline is the horizon, so every window
            // but the final one has an observed successor
            for start in 0..timeline.len().saturating_sub(len) {
                let next = &timeline[start + len];
                sequences.push(Sequence {
                    station: station.to_string(),
                    records: timeline[start..start + len].to_vec(),
                    label: next.incident_count_in_bucket > 0,
                    target_bucket: next.bucket_start,
                });
            }
        }

        sequences.sort_by(|a, b| {
            a.target_bucket
                .cmp(&b.target_bucket)
                .then_with(|| a.station.cmp(&b.station))
        });
        sequences
    }
}

/// One record per hour from the station's first bucket through `horizon`
fn hourly_timeline(
    station: &str,
    records: &[&FeatureRecord],
    horizon: DateTime<Utc>,
) -> Vec<FeatureRecord> {
    let Some(first) = records.first() else {
        return Vec::new();
    };

    let mut timeline = Vec::new();
    let mut pending = records.iter().peekable();
    let mut cursor = first.bucket_start;
    while cursor <= horizon {
        // Skip duplicates and anything not aligned to the hour grid
        while pending.next_if(|r| r.bucket_start < cursor).is_some() {}

        match pending.next_if(|r| r.bucket_start == cursor) {
            Some(record) => timeline.push((*record).clone()),
            None => timeline.push(FeatureRecord::quiet(station, cursor)),
        }
        cursor += Duration::hours(1);
    }
    timeline
}
