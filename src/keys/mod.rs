//! Key lifecycle — one key per slot, found or generated inside the TEE
//!
//! - **Slot**: the record-id → key-slot addressing rule
//! - **Lifecycle**: reuse a persisted key or generate and persist a new one

pub mod slot;
pub mod lifecycle;

pub use slot::{slot_for_record, RECORDS_PER_SLOT};
pub use lifecycle::{KeyLifecycleManager, KeyOrigin, KeyRecord};
