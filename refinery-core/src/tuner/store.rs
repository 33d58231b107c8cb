//! Append-only performance history, keyed by pipeline id.
//!
//! Provides a trait-based abstraction with two implementations:
//! - `InMemoryHistoryStore`: process-local, for tests and one-shot runs.
//! - `JsonFileHistoryStore`: one JSON Lines file per pipeline id in a directory.

use super::sample::PerformanceSample;
use crate::error::StoreError;
use crate::persistence::{append_json_line, read_json_lines};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Storage backend for tuner history.
///
/// A missing or empty history is zero samples, never an error.
pub trait HistoryStore: Send + Sync {
    /// All samples for `pipeline_id`, oldest first.
    fn load(&self, pipeline_id: &str) -> Result<Vec<PerformanceSample>, StoreError>;

    /// Append one sample to its pipeline's history.
    fn append(&self, sample: PerformanceSample) -> Result<(), StoreError>;

    /// Pipeline ids with at least one sample, sorted.
    fn pipeline_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory history store.
///
/// Thread-safe via `RwLock<HashMap>`. Does not persist across process restarts.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    samples: RwLock<HashMap<String, Vec<PerformanceSample>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn load(&self, pipeline_id: &str) -> Result<Vec<PerformanceSample>, StoreError> {
        let samples = self.samples.read().map_err(|_| StoreError::Poisoned)?;
        Ok(samples.get(pipeline_id).cloned().unwrap_or_default())
    }

    fn append(&self, sample: PerformanceSample) -> Result<(), StoreError> {
        let mut samples = self.samples.write().map_err(|_| StoreError::Poisoned)?;
        samples
            .entry(sample.pipeline_id.clone())
            .or_default()
            .push(sample);
        Ok(())
    }

    fn pipeline_ids(&self) -> Result<Vec<String>, StoreError> {
        let samples = self.samples.read().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<String> = samples.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Directory of `<pipeline>.jsonl` files, one sample per line.
///
/// Appends never rewrite existing lines, so several processes may share a
/// directory without losing samples. Within a process, appends for the same
/// pipeline id are serialized by a per-id mutex.
pub struct JsonFileHistoryStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonFileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a pipeline id. Ids that are not plain file-name
    /// characters get a hash suffix so distinct ids never share a file.
    pub fn path_for(&self, pipeline_id: &str) -> PathBuf {
        let safe: String = pipeline_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stem = if safe == pipeline_id && !safe.is_empty() {
            safe
        } else {
            let digest = Sha256::digest(pipeline_id.as_bytes());
            let hex: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
            format!("{safe}-{hex}")
        };
        self.dir.join(format!("{stem}.jsonl"))
    }

    fn lock_for(&self, pipeline_id: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks.entry(pipeline_id.to_string()).or_default().clone())
    }
}

impl HistoryStore for JsonFileHistoryStore {
    fn load(&self, pipeline_id: &str) -> Result<Vec<PerformanceSample>, StoreError> {
        read_json_lines(&self.path_for(pipeline_id)).map_err(|e| StoreError::Read {
            pipeline_id: pipeline_id.to_string(),
            message: e.to_string(),
        })
    }

    fn append(&self, sample: PerformanceSample) -> Result<(), StoreError> {
        let pipeline_id = sample.pipeline_id.clone();
        let lock = self.lock_for(&pipeline_id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let path = self.path_for(&pipeline_id);
        append_json_line(&path, &sample).map_err(|e| StoreError::Write {
            pipeline_id: pipeline_id.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(pipeline_id = %pipeline_id, path = %path.display(), "Appended history sample");
        Ok(())
    }

    fn pipeline_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Read {
                    pipeline_id: "*".into(),
                    message: e.to_string(),
                });
            }
        };

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match read_json_lines::<PerformanceSample>(&path) {
                Ok(samples) => {
                    if let Some(first) = samples.into_iter().next() {
                        ids.push(first.pipeline_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable history file");
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
