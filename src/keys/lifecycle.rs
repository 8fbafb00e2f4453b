//! Key Lifecycle Manager
//!
//! Resolves the key for a record: reuse the one persisted for its slot, or
//! have the trusted application generate one, persist it, and only then hand
//! it out. A generated key that could not be persisted is dropped with the
//! error; the next run would otherwise generate a different key for the
//! same slot.

use super::slot::slot_for_record;
use crate::storage::{InsertOutcome, KeyBytes, KeyStore};
use crate::tee::{CommandId, KeySize, Operation, SecureSession, TeeClient, TeeError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOrigin {
    /// Generated by the trusted application during this call
    Generated,
    /// Read back from the key store
    Loaded,
}

/// A key bound to a record's slot
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub record_id: u64,
    pub slot: u64,
    pub origin: KeyOrigin,
    key: KeyBytes,
}

impl KeyRecord {
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn key_len(&self) -> usize {
        self.key.len()
    }
}

/// Decides per record whether to reuse or generate a key
pub struct KeyLifecycleManager<K: KeyStore> {
    store: K,
    key_size: KeySize,
    generated: u64,
}

impl<K: KeyStore> KeyLifecycleManager<K> {
    pub fn new(store: K, key_size: KeySize) -> Self {
        Self {
            store,
            key_size,
            generated: 0,
        }
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut K {
        &mut self.store
    }

    pub fn key_size(&self) -> KeySize {
        self.key_size
    }

    /// Keys generated by this manager so far
    pub fn generated_count(&self) -> u64 {
        self.generated
    }

    /// Find or create the key for `record_id`
    pub fn resolve_key<C: TeeClient>(
        &mut self,
        session: &mut SecureSession<C>,
        record_id: u64,
    ) -> Result<KeyRecord, TeeError> {
        let slot = slot_for_record(record_id);

        if let Some(key) = self.store.lookup(slot)? {
            self.check_len(slot, &key)?;
            debug!("Reusing key for record {} (slot {})", record_id, slot);
            return Ok(KeyRecord {
                record_id,
                slot,
                origin: KeyOrigin::Loaded,
                key,
            });
        }

        info!("No key for slot {}, generating one in the TEE", slot);
        let key = self.generate(session)?;

        match self.store.insert_if_absent(slot, &key)? {
            InsertOutcome::Inserted => {
                self.generated += 1;
                info!("Generated and persisted key for slot {}", slot);
                Ok(KeyRecord {
                    record_id,
                    slot,
                    origin: KeyOrigin::Generated,
                    key,
                })
            }
            InsertOutcome::Existing(stored) => {
                warn!("Slot {} was filled concurrently, using the stored key", slot);
                self.check_len(slot, &stored)?;
                Ok(KeyRecord {
                    record_id,
                    slot,
                    origin: KeyOrigin::Loaded,
                    key: stored,
                })
            }
        }
    }

    fn generate<C: TeeClient>(&self, session: &mut SecureSession<C>) -> Result<KeyBytes, TeeError> {
        let mut op = Operation::generate_key(self.key_size.bytes());
        session.invoke(CommandId::GenerateKey, &mut op)?;
        let key = op
            .take_output(0)
            .map(Zeroizing::new)
            .ok_or_else(|| TeeError::short_output(CommandId::GenerateKey))?;
        if key.len() != self.key_size.bytes() {
            return Err(TeeError::short_output(CommandId::GenerateKey));
        }
        Ok(key)
    }

    fn check_len(&self, slot: u64, key: &[u8]) -> Result<(), TeeError> {
        if key.len() == self.key_size.bytes() {
            Ok(())
        } else {
            Err(TeeError::Storage(format!(
                "Key slot {} holds {} bytes, expected {}",
                slot,
                key.len(),
                self.key_size.bytes()
            )))
        }
    }
}
