use crate::error::{AppError, Result};
use crate::ml::models::ModelArtifact;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PREFIX: &str = "model-";
const SUFFIX: &str = ".json";

/// Versioned model artifacts stored as JSON files in one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, version_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", PREFIX, version_id, SUFFIX))
    }

    /// Persist an artifact; the file only appears once fully written
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&artifact.version_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(artifact)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        info!(
            version_id = %artifact.version_id,
            path = %path.display(),
            "Model artifact saved"
        );
        Ok(path)
    }

    /// Stored version ids, newest first
    pub fn list_versions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| {
                name.strip_prefix(PREFIX)
                    .and_then(|rest| rest.strip_suffix(SUFFIX))
                    .map(str::to_string)
            })
            .collect();
        versions.sort();
        versions.reverse();
        Ok(versions)
    }

    pub fn load(&self, version_id: &str) -> Result<ModelArtifact> {
        let path = self.path_for(version_id);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("model artifact {}", version_id)),
            _ => AppError::Io(e),
        })?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        if artifact.version_id != version_id {
            return Err(AppError::Serialization(format!(
                "artifact file {} declares version {}",
                path.display(),
                artifact.version_id
            )));
        }
        Ok(artifact)
    }

    /// Newest artifact that loads cleanly. Unreadable versions are skipped
    /// with a warning; an empty or missing directory yields `None`.
    pub fn load_latest(&self) -> Option<ModelArtifact> {
        let versions = match self.list_versions() {
            Ok(versions) => versions,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot list model artifacts");
                return None;
            }
        };

        for version in versions {
            match self.load(&version) {
                Ok(artifact) => {
                    debug!(version_id = %version, "Loaded model artifact");
                    return Some(artifact);
                }
                Err(e) => {
                    warn!(version_id = %version, error = %e, "Skipping unreadable model artifact");
                }
            }
        }
        None
    }

    /// Delete all but the newest `keep` versions; returns how many were removed
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let versions = self.list_versions()?;
        let mut removed = 0;
        for version in versions.iter().skip(keep.max(1)) {
            fs::remove_file(self.path_for(version))?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed = removed, kept = keep, "Pruned old model artifacts");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::models::{ModelMetrics, ModelType};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn artifact(days: i64) -> ModelArtifact {
        let trained_at = Utc.with_ymd_and_hms(2024, 3, 3, 23, 0, 0).unwrap() + Duration::days(days);
        ModelArtifact {
            version_id: ModelArtifact::new_version_id(trained_at),
            model_type: ModelType::SequenceLogistic,
            trained_at,
            metric_summary: ModelMetrics::default(),
            state: serde_json::json!({"weights": [days]}),
        }
    }

    #[test]
    fn test_missing_directory_means_no_model() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("absent"));
        assert!(store.load_latest().is_none());
        assert!(store.list_versions().unwrap().is_empty());
    }

    #[test]
    fn test_latest_wins_and_corrupt_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let older = artifact(0);
        let newer = artifact(7);
        store.save(&older).unwrap();
        store.save(&newer).unwrap();
        assert_eq!(store.load_latest().unwrap().version_id, newer.version_id);

        // A corrupt newest file falls back to the previous version
        let corrupt = artifact(14);
        fs::write(store.path_for(&corrupt.version_id), b"{ not json").unwrap();
        assert_eq!(store.load_latest().unwrap().version_id, newer.version_id);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let saved: Vec<ModelArtifact> = (0..4).map(artifact).collect();
        for a in &saved {
            store.save(a).unwrap();
        }

        assert_eq!(store.prune(2).unwrap(), 2);
        let versions = store.list_versions().unwrap();
        assert_eq!(versions, vec![saved[3].version_id.clone(), saved[2].version_id.clone()]);
    }

    #[test]
    fn test_same_second_artifacts_list_in_training_order() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let saved: Vec<ModelArtifact> = (0..5).map(|_| artifact(0)).collect();
        for a in &saved {
            store.save(a).unwrap();
        }

        let expected: Vec<String> = saved.iter().rev().map(|a| a.version_id.clone()).collect();
        assert_eq!(store.list_versions().unwrap(), expected);
        assert_eq!(store.load_latest().unwrap().version_id, saved[4].version_id);
    }
}
