//! Key File — line-per-slot key storage on the host filesystem
//!
//! Line N (0-based) holds the hex-encoded key for slot N. Slots are
//! normally created in order and appended; when a later slot is created
//! first, the skipped lines are written empty so that line number and slot
//! stay aligned, and the empty line is filled in place when its slot is
//! finally created.

use super::{InsertOutcome, KeyBytes, KeyStore};
use crate::tee::TeeError;
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Highest slot count a key file may address
pub const MAX_KEY_SLOTS: u64 = 4096;

/// File-backed `KeyStore`
#[derive(Debug, Clone)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slot lines currently in the file, filled or not
    pub fn slot_lines(&self) -> Result<usize, TeeError> {
        Ok(self.read_lines()?.len())
    }

    fn slot_index(slot: u64) -> Result<usize, TeeError> {
        if slot >= MAX_KEY_SLOTS {
            return Err(TeeError::Storage(format!(
                "Key slot {} out of range (max {})",
                slot,
                MAX_KEY_SLOTS - 1
            )));
        }
        usize::try_from(slot).map_err(|_| TeeError::Storage(format!("Key slot {} out of range", slot)))
    }

    fn read_lines(&self) -> Result<Vec<String>, TeeError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| TeeError::Storage(format!("Read {}: {}", self.path.display(), e)))?;
        Ok(data.lines().map(|l| l.trim().to_string()).collect())
    }

    fn decode(slot: u64, line: &str) -> Result<KeyBytes, TeeError> {
        hex::decode(line)
            .map(Zeroizing::new)
            .map_err(|e| TeeError::Storage(format!("Key slot {} is corrupt: {}", slot, e)))
    }

    /// Append `blanks` empty placeholder lines, then `line`
    fn append(&self, blanks: usize, line: &str) -> Result<(), TeeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TeeError::Storage(format!("Create dir: {}", e)))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TeeError::Storage(format!("Open {}: {}", self.path.display(), e)))?;
        for entry in std::iter::repeat("").take(blanks).chain(std::iter::once(line)) {
            writeln!(file, "{}", entry).map_err(|e| TeeError::Storage(format!("Write: {}", e)))?;
        }
        file.sync_all()
            .map_err(|e| TeeError::Storage(format!("Sync: {}", e)))?;
        Ok(())
    }

    fn rewrite(&self, lines: &[String]) -> Result<(), TeeError> {
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| TeeError::Storage(format!("Create {}: {}", tmp.display(), e)))?;
        for line in lines {
            writeln!(file, "{}", line).map_err(|e| TeeError::Storage(format!("Write: {}", e)))?;
        }
        file.sync_all()
            .map_err(|e| TeeError::Storage(format!("Sync: {}", e)))?;
        drop(file);
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TeeError::Storage(format!("Rename: {}", e)))?;
        Ok(())
    }
}

impl KeyStore for KeyFile {
    fn lookup(&self, slot: u64) -> Result<Option<KeyBytes>, TeeError> {
        let index = Self::slot_index(slot)?;
        let lines = self.read_lines()?;
        match lines.get(index) {
            Some(line) if !line.is_empty() => Ok(Some(Self::decode(slot, line)?)),
            _ => Ok(None),
        }
    }

    fn insert_if_absent(&mut self, slot: u64, key: &[u8]) -> Result<InsertOutcome, TeeError> {
        let index = Self::slot_index(slot)?;
        let mut lines = self.read_lines()?;
        let encoded = hex::encode(key);

        if let Some(line) = lines.get(index) {
            if !line.is_empty() {
                return Ok(InsertOutcome::Existing(Self::decode(slot, line)?));
            }
            lines[index] = encoded;
            self.rewrite(&lines)?;
            debug!("Filled key slot {} in {}", slot, self.path.display());
        } else {
            self.append(index - lines.len(), &encoded)?;
            debug!("Appended key slot {} to {}", slot, self.path.display());
        }

        info!("Persisted key for slot {}", slot);
        Ok(InsertOutcome::Inserted)
    }
}
