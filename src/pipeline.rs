//! Cipher Pipeline — record payloads through the trusted cipher engine
//!
//! `CipherPipeline` sends one buffer through a ready cipher context.
//! `process_record` runs the whole sequence for one stored record:
//! prepare, read, resolve key, load key and IV, transform, write back.

use crate::config::PipelineConfig;
use crate::keys::{KeyLifecycleManager, KeyOrigin};
use crate::storage::{DataRecord, KeyStore, RecordStore};
use crate::tee::{CipherContext, CommandId, Mode, Operation, SecureSession, TeeClient, TeeError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Which transform command carries the buffer. Both have the same
/// buffer-in / buffer-out contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// Plain buffer cipher
    Buffer,
    /// Payload of a record held by the record store
    Data,
}

impl TransformKind {
    pub fn command(self) -> CommandId {
        match self {
            TransformKind::Buffer => CommandId::Cipher,
            TransformKind::Data => CommandId::CipherData,
        }
    }
}

/// Buffer-in, buffer-out transform over a ready cipher context
#[derive(Debug, Clone, Copy)]
pub struct CipherPipeline {
    kind: TransformKind,
}

impl CipherPipeline {
    pub fn new(kind: TransformKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    /// Transform `input` into a new buffer of the same length
    pub fn transform<C: TeeClient>(
        &self,
        session: &mut SecureSession<C>,
        context: &CipherContext,
        input: &[u8],
    ) -> Result<Vec<u8>, TeeError> {
        let mut output = vec![0u8; input.len()];
        self.transform_into(session, context, input, &mut output)?;
        Ok(output)
    }

    /// Transform `input` into `output`. The two must be the same, non-zero
    /// length. `output` is only written if the whole transform succeeds.
    pub fn transform_into<C: TeeClient>(
        &self,
        session: &mut SecureSession<C>,
        context: &CipherContext,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), TeeError> {
        let command = self.kind.command();
        context.ensure_ready(command)?;
        if input.is_empty() || input.len() != output.len() {
            return Err(TeeError::SizeMismatch {
                input: input.len(),
                output: output.len(),
            });
        }

        let mut op = Operation::transform(input);
        session.invoke(command, &mut op)?;

        let result = op
            .take_output(1)
            .ok_or_else(|| TeeError::short_output(command))?;
        if result.len() != output.len() {
            return Err(TeeError::short_output(command));
        }
        output.copy_from_slice(&result);
        debug!("{} transformed {} bytes", command, input.len());
        Ok(())
    }
}

/// Outcome of processing one record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub record_id: u64,
    pub slot: u64,
    pub key_origin: KeyOrigin,
    pub mode: Mode,
    pub transform: TransformKind,
    pub bytes: usize,
    pub processed_at: DateTime<Utc>,
}

/// Encode or decode one stored record in place
pub fn process_record<C, K, R>(
    session: &mut SecureSession<C>,
    keys: &mut KeyLifecycleManager<K>,
    records: &mut R,
    config: &PipelineConfig,
    record_id: u64,
    mode: Mode,
) -> Result<ProcessReport, TeeError>
where
    C: TeeClient,
    K: KeyStore,
    R: RecordStore,
{
    let iv = config.iv_bytes()?;
    let mut context = CipherContext::new();
    context.prepare(session, config.algorithm, config.key_size, mode)?;

    let record = records.read(record_id)?;
    check_block(&record, config.block_size)?;

    let key = keys.resolve_key(session, record_id)?;
    context.set_key(session, key.key_bytes())?;
    context.set_iv(session, &iv)?;

    let pipeline = CipherPipeline::new(config.transform);
    let payload = pipeline.transform(session, &context, &record.payload)?;
    records.write(&DataRecord::new(record_id, payload))?;

    info!(
        "Record {} {:?}d with slot {} key ({:?})",
        record_id, mode, key.slot, key.origin
    );

    Ok(ProcessReport {
        record_id,
        slot: key.slot,
        key_origin: key.origin,
        mode,
        transform: config.transform,
        bytes: record.payload.len(),
        processed_at: Utc::now(),
    })
}

/// Encode a stored record and decode the result again without writing
/// anything back. True when the decoded payload equals the stored one.
pub fn verify_round_trip<C, K, R>(
    session: &mut SecureSession<C>,
    keys: &mut KeyLifecycleManager<K>,
    records: &R,
    config: &PipelineConfig,
    record_id: u64,
) -> Result<bool, TeeError>
where
    C: TeeClient,
    K: KeyStore,
    R: RecordStore,
{
    let iv = config.iv_bytes()?;
    let record = records.read(record_id)?;
    check_block(&record, config.block_size)?;
    let key = keys.resolve_key(session, record_id)?;
    let pipeline = CipherPipeline::new(config.transform);

    let mut context = CipherContext::new();
    context.prepare(session, config.algorithm, config.key_size, Mode::Encode)?;
    context.set_key(session, key.key_bytes())?;
    context.set_iv(session, &iv)?;
    let encoded = pipeline.transform(session, &context, &record.payload)?;

    context.prepare(session, config.algorithm, config.key_size, Mode::Decode)?;
    context.set_key(session, key.key_bytes())?;
    context.set_iv(session, &iv)?;
    let decoded = pipeline.transform(session, &context, &encoded)?;

    let matches = decoded == record.payload;
    if matches {
        info!("Record {}: clear text and decoded text match", record_id);
    } else {
        log::error!("Record {}: clear text and decoded text differ", record_id);
    }
    Ok(matches)
}

fn check_block(record: &DataRecord, block_size: usize) -> Result<(), TeeError> {
    if record.payload.len() == block_size {
        Ok(())
    } else {
        Err(TeeError::SizeMismatch {
            input: record.payload.len(),
            output: block_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKeyStore, MemoryRecordStore};
    use crate::tee::{
        Algorithm, CipherState, ErrorOrigin, KeySize, SimulatedTrustedApp, TeeStatus, SERVICE_UUID,
    };

    const KEY: [u8; 16] = [0xa5; 16];
    const IV: [u8; 16] = [0u8; 16];

    fn open() -> SecureSession<SimulatedTrustedApp> {
        SecureSession::open(SimulatedTrustedApp::new(), SERVICE_UUID).unwrap()
    }

    fn ready_context(session: &mut SecureSession<SimulatedTrustedApp>, mode: Mode) -> CipherContext {
        let mut ctx = CipherContext::new();
        ctx.prepare(session, Algorithm::Ctr, KeySize::Aes128, mode).unwrap();
        ctx.set_key(session, &KEY).unwrap();
        ctx.set_iv(session, &IV).unwrap();
        ctx
    }

    fn plaintext() -> Vec<u8> {
        (0..128u32).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_encode_then_decode_128_bytes() {
        let mut session = open();
        let pipeline = CipherPipeline::new(TransformKind::Buffer);
        let clear = plaintext();

        let ctx = ready_context(&mut session, Mode::Encode);
        let ciphertext = pipeline.transform(&mut session, &ctx, &clear).unwrap();
        assert_eq!(ciphertext.len(), 128);
        assert_ne!(ciphertext, clear);

        let ctx = ready_context(&mut session, Mode::Decode);
        let decoded = pipeline.transform(&mut session, &ctx, &ciphertext).unwrap();
        assert_eq!(decoded, clear);
    }

    #[test]
    fn test_round_trip_various_payloads() {
        let mut session = open();
        for kind in [TransformKind::Buffer, TransformKind::Data] {
            let pipeline = CipherPipeline::new(kind);
            for len in [1usize, 15, 16, 17, 100, 128, 1000] {
                let clear: Vec<u8> = (0..len).map(|i| i as u8 ^ 0x3c).collect();
                let ctx = ready_context(&mut session, Mode::Encode);
                let ciphertext = pipeline.transform(&mut session, &ctx, &clear).unwrap();
                let ctx = ready_context(&mut session, Mode::Decode);
                let decoded = pipeline.transform(&mut session, &ctx, &ciphertext).unwrap();
                assert_eq!(decoded, clear, "kind {:?} len {}", kind, len);
            }
        }
    }

    #[test]
    fn test_data_variant_sends_cipher_data() {
        let mut session = open();
        let ctx = ready_context(&mut session, Mode::Encode);
        CipherPipeline::new(TransformKind::Data)
            .transform(&mut session, &ctx, &[1u8; 32])
            .unwrap();
        assert_eq!(session.client().invocation_count(CommandId::CipherData), 1);
        assert_eq!(session.client().invocation_count(CommandId::Cipher), 0);
    }

    #[test]
    fn test_cipher_before_set_iv() {
        let mut session = open();
        let mut ctx = CipherContext::new();
        ctx.prepare(&mut session, Algorithm::Ctr, KeySize::Aes128, Mode::Encode)
            .unwrap();
        ctx.set_key(&mut session, &KEY).unwrap();
        let before = session.invocations();

        let err = CipherPipeline::new(TransformKind::Buffer)
            .transform(&mut session, &ctx, &[0u8; 16])
            .unwrap_err();
        assert!(matches!(
            err,
            TeeError::ProtocolOrder {
                command: CommandId::Cipher,
                state: CipherState::KeySet
            }
        ));
        assert_eq!(session.invocations(), before);
        assert_eq!(session.client().invocation_count(CommandId::Cipher), 0);
    }

    #[test]
    fn test_size_mismatch_before_remote_call() {
        let mut session = open();
        let ctx = ready_context(&mut session, Mode::Encode);
        let before = session.invocations();
        let pipeline = CipherPipeline::new(TransformKind::Buffer);

        let mut output = [0u8; 64];
        let err = pipeline
            .transform_into(&mut session, &ctx, &[0u8; 128], &mut output)
            .unwrap_err();
        assert!(matches!(err, TeeError::SizeMismatch { input: 128, output: 64 }));
        assert!(err.is_local());

        let err = pipeline.transform(&mut session, &ctx, &[]).unwrap_err();
        assert!(matches!(err, TeeError::SizeMismatch { input: 0, output: 0 }));
        assert_eq!(session.invocations(), before);
    }

    #[test]
    fn test_failed_transform_leaves_output_untouched() {
        let mut session = open();
        let ctx = ready_context(&mut session, Mode::Encode);
        session
            .client_mut()
            .fail_command(CommandId::Cipher, TeeStatus::GENERIC);

        let mut output = [0x77u8; 16];
        let err = CipherPipeline::new(TransformKind::Buffer)
            .transform_into(&mut session, &ctx, &[1u8; 16], &mut output)
            .unwrap_err();
        assert!(matches!(err, TeeError::Command { command: CommandId::Cipher, .. }));
        assert_eq!(output, [0x77u8; 16]);
    }

    #[test]
    fn test_short_remote_output_is_command_error() {
        let mut session = open();
        let ctx = ready_context(&mut session, Mode::Encode);
        session.client_mut().truncate_output(CommandId::CipherData);

        let mut output = [0x77u8; 32];
        let err = CipherPipeline::new(TransformKind::Data)
            .transform_into(&mut session, &ctx, &[1u8; 32], &mut output)
            .unwrap_err();
        assert!(matches!(
            err,
            TeeError::Command {
                command: CommandId::CipherData,
                code: TeeStatus::SHORT_BUFFER,
                origin: ErrorOrigin::TrustedApp,
            }
        ));
        assert!(!err.is_local());
        assert_eq!(output, [0x77u8; 32]);
    }

    fn seeded(record_id: u64) -> (MemoryRecordStore, Vec<u8>) {
        let mut records = MemoryRecordStore::new();
        let clear = plaintext();
        records.insert(DataRecord::new(record_id, clear.clone()));
        (records, clear)
    }

    #[test]
    fn test_process_record_encode_then_decode() {
        let mut session = open();
        let mut keys = KeyLifecycleManager::new(MemoryKeyStore::new(), KeySize::Aes128);
        let (mut records, clear) = seeded(0);
        let config = PipelineConfig::default();

        let report =
            process_record(&mut session, &mut keys, &mut records, &config, 0, Mode::Encode).unwrap();
        assert_eq!(report.key_origin, KeyOrigin::Generated);
        assert_eq!(report.bytes, 128);
        let stored = records.read(0).unwrap().payload;
        assert_ne!(stored, clear);

        let report =
            process_record(&mut session, &mut keys, &mut records, &config, 0, Mode::Decode).unwrap();
        assert_eq!(report.key_origin, KeyOrigin::Loaded);
        assert_eq!(records.read(0).unwrap().payload, clear);
        assert_eq!(session.client().invocation_count(CommandId::GenerateKey), 1);
    }

    #[test]
    fn test_process_record_wrong_block_size() {
        let mut session = open();
        let mut keys = KeyLifecycleManager::new(MemoryKeyStore::new(), KeySize::Aes128);
        let mut records = MemoryRecordStore::new();
        records.insert(DataRecord::new(5, vec![1u8; 100]));

        let err = process_record(
            &mut session,
            &mut keys,
            &mut records,
            &PipelineConfig::default(),
            5,
            Mode::Encode,
        )
        .unwrap_err();
        assert!(matches!(err, TeeError::SizeMismatch { input: 100, output: 128 }));
        assert!(keys.store().is_empty());
        assert_eq!(records.read(5).unwrap().payload, vec![1u8; 100]);
    }

    #[test]
    fn test_process_record_missing() {
        let mut session = open();
        let mut keys = KeyLifecycleManager::new(MemoryKeyStore::new(), KeySize::Aes128);
        let mut records = MemoryRecordStore::new();
        let err = process_record(
            &mut session,
            &mut keys,
            &mut records,
            &PipelineConfig::default(),
            9,
            Mode::Encode,
        )
        .unwrap_err();
        assert!(matches!(err, TeeError::RecordNotFound(9)));
        assert_eq!(err.kind(), "StorageError");
    }

    #[test]
    fn test_process_record_command_failure_keeps_record() {
        let mut session = open();
        session
            .client_mut()
            .fail_command(CommandId::CipherData, TeeStatus::BAD_STATE);
        let mut keys = KeyLifecycleManager::new(MemoryKeyStore::new(), KeySize::Aes128);
        let (mut records, clear) = seeded(1);

        let err = process_record(
            &mut session,
            &mut keys,
            &mut records,
            &PipelineConfig::default(),
            1,
            Mode::Encode,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "CommandError");
        assert_eq!(records.read(1).unwrap().payload, clear);
        // The key was generated and persisted before the transform failed
        assert_eq!(keys.store().len(), 1);
    }

    #[test]
    fn test_verify_round_trip() {
        let mut session = open();
        let mut keys = KeyLifecycleManager::new(MemoryKeyStore::new(), KeySize::Aes128);
        let (records, _) = seeded(250);

        let ok = verify_round_trip(&mut session, &mut keys, &records, &PipelineConfig::default(), 250)
            .unwrap();
        assert!(ok);
        assert_eq!(keys.store().lookup(2).unwrap().map(|k| k.len()), Some(16));
    }
}
