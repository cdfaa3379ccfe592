//! Append-only, minute-keyed JSON storage
//!
//! Every dataset is a directory under the data root holding one
//! `YYYY-MM-DD_HH-MM.json` file per poll minute (exchange local time). A
//! file, once in place, is never rewritten or removed: a second write for the
//! same minute is a no-op that keeps the first payload.
//!
//! Writes go to a temp file in the target directory first and are then
//! hard-linked into place, which fails instead of clobbering if another
//! writer got there first. Readers never observe a partial file.

use crate::constants::{REFERENCE_DIR, REFERENCE_FILE};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, SymbolReference};
use crate::utils::{minute_file_stem, to_exchange_time};
use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Raw endpoint response as persisted in the per-endpoint datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub timestamp: DateTime<FixedOffset>,
    pub endpoint: Endpoint,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// A file for this minute already existed and was left untouched
    Skipped(PathBuf),
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            WriteOutcome::Written(p) | WriteOutcome::Skipped(p) => p,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    root: PathBuf,
}

impl TimeSeriesStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset: &str) -> Result<PathBuf> {
        validate_dataset(dataset)?;
        Ok(self.root.join(dataset))
    }

    /// Target file for `dataset` at `timestamp`, truncated to the minute
    pub fn dataset_path<Tz: TimeZone>(&self, dataset: &str, timestamp: &DateTime<Tz>) -> Result<PathBuf> {
        Ok(self
            .dataset_dir(dataset)?
            .join(format!("{}.json", minute_file_stem(timestamp))))
    }

    pub fn reference_path(&self) -> PathBuf {
        self.root.join(REFERENCE_DIR).join(REFERENCE_FILE)
    }

    /// Persist `payload` for the poll minute of `timestamp`
    ///
    /// One retry on failure, then `StorageError`.
    pub async fn write<T, Tz>(&self, dataset: &str, timestamp: &DateTime<Tz>, payload: &T) -> Result<WriteOutcome>
    where
        T: Serialize + ?Sized,
        Tz: TimeZone,
    {
        let path = self.dataset_path(dataset, timestamp)?;
        let bytes = serde_json::to_vec_pretty(payload)?;

        match self.write_once(&path, &bytes).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(dataset = dataset, path = %path.display(), error = %e, "Write failed, retrying once");
                self.write_once(&path, &bytes).await.map_err(|e| {
                    AppError::Storage(format!("failed to write {}: {}", path.display(), e))
                })
            }
        }
    }

    /// Store a raw endpoint response in the endpoint's own dataset
    pub async fn write_raw(&self, endpoint: Endpoint, timestamp: DateTime<FixedOffset>, data: Value) -> Result<WriteOutcome> {
        let envelope = RawEnvelope {
            timestamp: to_exchange_time(&timestamp),
            endpoint,
            data,
        };
        self.write(endpoint.as_str(), &timestamp, &envelope).await
    }

    async fn write_once(&self, path: &Path, bytes: &[u8]) -> Result<WriteOutcome> {
        if fs::try_exists(path).await? {
            debug!(path = %path.display(), "File for this minute already exists, skipping");
            return Ok(WriteOutcome::Skipped(path.to_path_buf()));
        }

        let dir = path
            .parent()
            .ok_or_else(|| AppError::Storage(format!("no parent directory for {}", path.display())))?;
        fs::create_dir_all(dir).await?;

        let temp_path = temp_path_for(path);
        if let Err(e) = write_synced(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        // hard_link refuses to replace an existing file
        let result = match fs::hard_link(&temp_path, path).await {
            Ok(()) => Ok(WriteOutcome::Written(path.to_path_buf())),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Lost race for minute file, skipping");
                Ok(WriteOutcome::Skipped(path.to_path_buf()))
            }
            Err(e) => {
                // Filesystems without hard links
                debug!(error = %e, "Hard link failed, falling back to rename");
                if fs::try_exists(path).await? {
                    Ok(WriteOutcome::Skipped(path.to_path_buf()))
                } else {
                    fs::rename(&temp_path, path)
                        .await
                        .map(|_| WriteOutcome::Written(path.to_path_buf()))
                        .map_err(AppError::from)
                }
            }
        };

        let _ = fs::remove_file(&temp_path).await;
        result
    }

    /// Path of the newest file in `dataset`
    pub async fn latest_path(&self, dataset: &str) -> Result<PathBuf> {
        let dir = self.dataset_dir(dataset)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("dataset '{}' has no data", dataset)));
            }
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            // File names sort chronologically
            if latest.as_deref().map_or(true, |current| name.as_str() > current) {
                latest = Some(name);
            }
        }

        latest
            .map(|name| dir.join(name))
            .ok_or_else(|| AppError::NotFound(format!("dataset '{}' has no data", dataset)))
    }

    pub async fn read_latest(&self, dataset: &str) -> Result<Value> {
        let path = self.latest_path(dataset).await?;
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the symbol reference table
    ///
    /// An empty table is refused and the previous one kept.
    pub async fn refresh_reference(&self, table: &SymbolReference) -> Result<PathBuf> {
        if table.is_empty() {
            return Err(AppError::Storage(
                "refusing to replace symbol reference with an empty table".to_string(),
            ));
        }

        let path = self.reference_path();
        let dir = path
            .parent()
            .ok_or_else(|| AppError::Storage("invalid reference path".to_string()))?;
        fs::create_dir_all(dir).await?;

        let bytes = serde_json::to_vec_pretty(table)?;
        let temp_path = temp_path_for(&path);
        if let Err(e) = write_synced(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AppError::Storage(format!("failed to write reference table: {}", e)));
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AppError::Storage(format!("failed to replace reference table: {}", e)));
        }

        info!(symbols = table.len(), refreshed_on = %table.refreshed_on, "Symbol reference refreshed");
        Ok(path)
    }

    /// Current reference table, `None` if none has been stored yet
    pub async fn load_reference(&self) -> Result<Option<SymbolReference>> {
        let path = self.reference_path();
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_dataset(dataset: &str) -> Result<()> {
    let invalid = dataset.is_empty()
        || dataset.starts_with('.')
        || dataset.contains(['/', '\\'])
        || dataset.contains("..");
    if invalid {
        return Err(AppError::Storage(format!("invalid dataset name '{}'", dataset)));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
