//! teecrypt — record encryption delegated to a trusted execution environment
//!
//! The host never touches the cipher: it opens a session with a trusted
//! application, drives its cipher engine through a checked command sequence,
//! and keeps one key per record slot, generated inside the TEE and persisted
//! on the host before first use.

pub mod tee;
pub mod keys;
pub mod storage;
pub mod pipeline;
pub mod config;

pub use tee::{CipherContext, SecureSession, SimulatedTrustedApp, TeeClient, TeeError};
pub use keys::{KeyLifecycleManager, KeyOrigin, KeyRecord};
pub use storage::{DataRecord, KeyFile, KeyStore, RecordFile, RecordStore};
pub use pipeline::{process_record, verify_round_trip, CipherPipeline, ProcessReport, TransformKind};
pub use config::PipelineConfig;
