//! Storage adapters for key material and record payloads
//!
//! The core only sees two small contracts:
//! - `KeyStore`: look a key up by slot, or insert one if the slot is empty
//! - `RecordStore`: read and write a record's payload by id
//!
//! In-memory implementations live here; file-backed ones live in
//! `key_file` (one hex line per slot) and `record_file` (JSON).

pub mod key_file;
pub mod record_file;

use crate::tee::TeeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use zeroize::Zeroizing;

pub use key_file::{KeyFile, MAX_KEY_SLOTS};
pub use record_file::RecordFile;

/// Raw key bytes, wiped when dropped
pub type KeyBytes = Zeroizing<Vec<u8>>;

/// Result of an insert-if-absent on a key slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The slot was empty and now holds the new key
    Inserted,
    /// The slot already held a key; it was left untouched
    Existing(KeyBytes),
}

/// Persistent key material addressed by slot
pub trait KeyStore {
    fn lookup(&self, slot: u64) -> Result<Option<KeyBytes>, TeeError>;

    /// Persist `key` for `slot` unless the slot already has one
    fn insert_if_absent(&mut self, slot: u64, key: &[u8]) -> Result<InsertOutcome, TeeError>;
}

/// Persistent record payloads addressed by record id
pub trait RecordStore {
    fn read(&self, record_id: u64) -> Result<DataRecord, TeeError>;

    fn write(&mut self, record: &DataRecord) -> Result<(), TeeError>;
}

/// A record payload of one pipeline block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub record_id: u64,
    pub payload: Vec<u8>,
}

impl DataRecord {
    pub fn new(record_id: u64, payload: Vec<u8>) -> Self {
        Self { record_id, payload }
    }

    /// Zero-pad `bytes` to exactly `block_size` bytes
    pub fn padded(record_id: u64, bytes: &[u8], block_size: usize) -> Result<Self, TeeError> {
        if bytes.len() > block_size {
            return Err(TeeError::SizeMismatch {
                input: bytes.len(),
                output: block_size,
            });
        }
        let mut payload = vec![0u8; block_size];
        payload[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { record_id, payload })
    }

    /// Payload with trailing zero padding removed
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.payload[..end]
    }
}

/// Key store held in memory
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: BTreeMap<u64, KeyBytes>,
    fail_writes: bool,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert fail, as if the backing device were gone
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup(&self, slot: u64) -> Result<Option<KeyBytes>, TeeError> {
        Ok(self.keys.get(&slot).cloned())
    }

    fn insert_if_absent(&mut self, slot: u64, key: &[u8]) -> Result<InsertOutcome, TeeError> {
        if let Some(existing) = self.keys.get(&slot) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if self.fail_writes {
            return Err(TeeError::Storage(format!("key slot {} not writable", slot)));
        }
        self.keys.insert(slot, Zeroizing::new(key.to_vec()));
        Ok(InsertOutcome::Inserted)
    }
}

/// Record store held in memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: HashMap<u64, Vec<u8>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: DataRecord) {
        self.records.insert(record.record_id, record.payload);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self, record_id: u64) -> Result<DataRecord, TeeError> {
        self.records
            .get(&record_id)
            .map(|payload| DataRecord::new(record_id, payload.clone()))
            .ok_or(TeeError::RecordNotFound(record_id))
    }

    fn write(&mut self, record: &DataRecord) -> Result<(), TeeError> {
        self.records.insert(record.record_id, record.payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_record() {
        let record = DataRecord::padded(3, b"hello", 16).unwrap();
        assert_eq!(record.payload.len(), 16);
        assert_eq!(record.trimmed(), b"hello");

        let err = DataRecord::padded(3, &[1u8; 17], 16).unwrap_err();
        assert!(matches!(err, TeeError::SizeMismatch { input: 17, output: 16 }));
    }

    #[test]
    fn test_memory_key_store_insert_if_absent() {
        let mut store = MemoryKeyStore::new();
        assert!(store.lookup(0).unwrap().is_none());

        assert_eq!(store.insert_if_absent(0, &[1u8; 16]).unwrap(), InsertOutcome::Inserted);
        match store.insert_if_absent(0, &[2u8; 16]).unwrap() {
            InsertOutcome::Existing(key) => assert_eq!(key.as_slice(), &[1u8; 16]),
            InsertOutcome::Inserted => panic!("slot overwritten"),
        }
        assert_eq!(store.lookup(0).unwrap().unwrap().as_slice(), &[1u8; 16]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_key_store_write_failure() {
        let mut store = MemoryKeyStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.insert_if_absent(4, &[0u8; 16]),
            Err(TeeError::Storage(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_record_store() {
        let mut store = MemoryRecordStore::new();
        assert!(matches!(store.read(9), Err(TeeError::RecordNotFound(9))));

        store.write(&DataRecord::new(9, vec![1, 2, 3])).unwrap();
        assert_eq!(store.read(9).unwrap().payload, vec![1, 2, 3]);
    }
}
