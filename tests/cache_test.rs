//! Prediction cache: batch atomicity, snapshots and stale-while-revalidate

mod common;

use chrono::{DateTime, Duration, Utc};
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tempfile::TempDir;
use transit_risk_engine::{
    config::CacheConfig,
    models::{truncate_to_hour, IncidentType, PredictionRecord, PredictionSource, RiskEstimate},
    state::{CacheLookup, PredictionCache},
};

const STATIONS: [&str; 4] = ["Calle 26", "Marly", "Portal Sur", "Ricaurte"];

/// Logistic output for an arbitrary logit; full-precision scores like a
/// trained model produces
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn batch(version: &str, start: DateTime<Utc>, hours: i64) -> Vec<PredictionRecord> {
    let generated_at = Utc::now();
    let mut records = Vec::new();
    for h in 0..hours {
        for (i, station) in STATIONS.iter().enumerate() {
            let logit = (h as f64 * 0.731 + i as f64 * 1.37).sin() * 3.1;
            records.push(PredictionRecord::new(
                *station,
                start + Duration::hours(h),
                RiskEstimate::new(sigmoid(logit), IncidentType::Pickpocketing),
                generated_at,
                version,
                PredictionSource::Model,
            ));
        }
    }
    records
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_mixed_batches() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(PredictionCache::new(cache_config(&dir)));
    let start = truncate_to_hour(Utc::now());
    cache.put_batch(batch("v0", start, 12), StdDuration::from_secs(600));

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let done = done.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            let mut reads = 0;
            while !done.load(Ordering::Acquire) {
                let window = cache.forward_window(start, 12);
                assert_eq!(window.len(), 48);
                let version = &window[0].model_version;
                let generated_at = window[0].generated_at;
                assert!(window
                    .iter()
                    .all(|r| &r.model_version == version && r.generated_at == generated_at));
                reads += 1;
            }
            reads
        }));
    }

    for i in 1..=200 {
        cache.put_batch(batch(&format!("v{}", i), start, 12), StdDuration::from_secs(600));
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    assert_eq!(cache.generation().model_version(), Some("v200"));
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let start = truncate_to_hour(Utc::now());

    let cache = PredictionCache::new(cache_config(&dir));
    cache.put_batch(batch("v7", start, 3), StdDuration::from_secs(600));
    assert_eq!(cache.snapshot_to_storage().unwrap(), 12);

    let restored = PredictionCache::new(cache_config(&dir));
    assert_eq!(restored.restore_from_storage(), 12);

    let before: Vec<_> = cache.generation().entries().into_iter().cloned().collect();
    let after: Vec<_> = restored.generation().entries().into_iter().cloned().collect();
    assert_eq!(before, after);
    assert_eq!(restored.generation().model_version(), Some("v7"));
}

#[tokio::test]
async fn test_snapshot_scores_restore_bit_for_bit() {
    let dir = TempDir::new().unwrap();
    let start = truncate_to_hour(Utc::now());

    let cache = PredictionCache::new(cache_config(&dir));
    cache.put_batch(batch("v8", start, 500), StdDuration::from_secs(600));
    assert_eq!(cache.snapshot_to_storage().unwrap(), 2000);

    let restored = PredictionCache::new(cache_config(&dir));
    assert_eq!(restored.restore_from_storage(), 2000);

    let before = cache.generation();
    let after = restored.generation();
    let mut distinct = std::collections::HashSet::new();
    for (original, reloaded) in before.entries().into_iter().zip(after.entries()) {
        assert_eq!(original.record.station, reloaded.record.station);
        assert_eq!(original.record.predicted_time, reloaded.record.predicted_time);
        assert_eq!(
            original.record.risk_score.to_bits(),
            reloaded.record.risk_score.to_bits(),
            "{} at {}",
            original.record.station,
            original.record.predicted_time
        );
        distinct.insert(original.record.risk_score.to_bits());
    }
    assert!(distinct.len() > 100);
}

#[tokio::test]
async fn test_snapshot_from_the_runtime() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(PredictionCache::new(cache_config(&dir)));
    cache.put_batch(batch("v3", truncate_to_hour(Utc::now()), 2), StdDuration::from_secs(600));

    assert_eq!(cache.snapshot_async().await.unwrap(), 8);

    let restored = PredictionCache::new(cache_config(&dir));
    assert_eq!(restored.restore_from_storage(), 8);
    assert_eq!(restored.generation().model_version(), Some("v3"));
}

#[tokio::test]
async fn test_corrupt_snapshot_is_discarded() {
    let dir = TempDir::new().unwrap();
    let config = cache_config(&dir);
    std::fs::write(&config.snapshot_path, br#"[{"station": "Marly", "risk_score": 7.5}]"#).unwrap();

    let cache = PredictionCache::new(config);
    assert_eq!(cache.restore_from_storage(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_out_of_range_snapshot_entry_discards_everything() {
    let dir = TempDir::new().unwrap();
    let config = cache_config(&dir);
    let start = truncate_to_hour(Utc::now());

    let cache = PredictionCache::new(config.clone());
    cache.put_batch(batch("v1", start, 2), StdDuration::from_secs(600));
    cache.snapshot_to_storage().unwrap();

    let mut json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&config.snapshot_path).unwrap()).unwrap();
    json[3]["risk_score"] = serde_json::json!(1.5);
    std::fs::write(&config.snapshot_path, serde_json::to_vec(&json).unwrap()).unwrap();

    let restored = PredictionCache::new(config);
    assert_eq!(restored.restore_from_storage(), 0);
    assert!(restored.is_empty());
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    let cache = PredictionCache::new(CacheConfig {
        snapshot_path: dir.path().join("nested").join("cache.json"),
        ..Default::default()
    });
    assert_eq!(cache.restore_from_storage(), 0);

    // Writing creates the missing parent directory
    cache.put_batch(batch("v1", truncate_to_hour(Utc::now()), 1), StdDuration::from_secs(60));
    assert_eq!(cache.snapshot_to_storage().unwrap(), 4);
}

#[tokio::test]
async fn test_stale_entries_are_served_and_request_refresh() {
    let dir = TempDir::new().unwrap();
    let cache = PredictionCache::new(cache_config(&dir));
    let mut requests = cache.take_refresh_receiver().unwrap();
    let start = truncate_to_hour(Utc::now());

    cache.put_batch(batch("v1", start, 2), StdDuration::ZERO);

    for station in STATIONS {
        match cache.get(station, start).await {
            CacheLookup::Stale(record) => assert_eq!(record.model_version, "v1"),
            other => panic!("expected stale entry, got {:?}", other),
        }
    }

    // Many stale reads, one pending refresh
    let request = requests.try_recv().unwrap();
    assert_eq!(request.bucket, start);
    assert!(requests.try_recv().is_err());
}
