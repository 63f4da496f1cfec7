//! JSON snapshot of the forward prediction window.
//!
//! The file is a plain array of entries, each a prediction record plus its
//! `expires_at`. Restore is all or nothing: one bad entry discards the file.

use crate::error::{AppError, Result};
use crate::state::cache::CacheEntry;
use std::fs;
use std::path::Path;

/// Write entries atomically (temp file + rename)
pub fn write_snapshot(path: &Path, entries: &[CacheEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(entries)?;
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and validate a snapshot.
///
/// Returns `Ok(None)` when the file does not exist and
/// `Err(AppError::CacheCorruption)` when it cannot be trusted.
pub fn read_snapshot(path: &Path) -> Result<Option<Vec<CacheEntry>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let entries: Vec<CacheEntry> = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::CacheCorruption(format!("{}: {}", path.display(), e)))?;
    validate(&entries)?;
    Ok(Some(entries))
}

fn validate(entries: &[CacheEntry]) -> Result<()> {
    let mut version: Option<&str> = None;
    for (index, entry) in entries.iter().enumerate() {
        entry
            .record
            .validate()
            .map_err(|e| AppError::CacheCorruption(format!("entry {}: {}", index, e)))?;

        match version {
            None => version = Some(entry.record.model_version.as_str()),
            Some(v) if v != entry.record.model_version => {
                return Err(AppError::CacheCorruption(format!(
                    "entry {} has model_version {} but batch was written by {}",
                    index, entry.record.model_version, v
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
