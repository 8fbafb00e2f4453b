//! Record File — JSON-backed record payload store
//!
//! Payloads are kept hex-encoded alongside the time they were last written.
//! Every write is flushed to disk before it returns.

use super::{DataRecord, RecordStore};
use crate::tee::TeeError;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Hex-encoded payload
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordFile {
    pub records: BTreeMap<u64, StoredRecord>,
    #[serde(skip)]
    path: PathBuf,
}

impl RecordFile {
    /// Open the record file at `path`, or start an empty one if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TeeError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                records: BTreeMap::new(),
                path,
            });
        }

        let data = std::fs::read_to_string(&path)
            .map_err(|e| TeeError::Storage(format!("Read {}: {}", path.display(), e)))?;
        let mut store: RecordFile = serde_json::from_str(&data)
            .map_err(|e| TeeError::Storage(format!("Parse {}: {}", path.display(), e)))?;
        store.path = path;
        Ok(store)
    }

    pub fn save(&self) -> Result<(), TeeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TeeError::Storage(format!("Create dir: {}", e)))?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TeeError::Storage(format!("Serialize: {}", e)))?;
        std::fs::write(&self.path, json)
            .map_err(|e| TeeError::Storage(format!("Write {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.records.keys().copied().collect()
    }
}

impl RecordStore for RecordFile {
    fn read(&self, record_id: u64) -> Result<DataRecord, TeeError> {
        let stored = self
            .records
            .get(&record_id)
            .ok_or(TeeError::RecordNotFound(record_id))?;
        let payload = hex::decode(&stored.payload)
            .map_err(|e| TeeError::Storage(format!("Record {} is corrupt: {}", record_id, e)))?;
        Ok(DataRecord::new(record_id, payload))
    }

    fn write(&mut self, record: &DataRecord) -> Result<(), TeeError> {
        self.records.insert(
            record.record_id,
            StoredRecord {
                payload: hex::encode(&record.payload),
                updated_at: Utc::now(),
            },
        );
        self.save()?;
        debug!(
            "Wrote record {} ({} bytes) to {}",
            record.record_id,
            record.payload.len(),
            self.path.display()
        );
        Ok(())
    }
}
