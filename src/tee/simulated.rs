//! Simulated trusted application
//!
//! An in-process stand-in for the trusted cipher application, reachable
//! only through `TeeClient` just like the real one. It enforces the same
//! command sequencing as the real engine (answering BAD_STATE when a command
//! arrives too early), checks parameter shapes, and keeps a CTR-style stream
//! position that continues across transforms until the next SET_IV.
//!
//! The keystream is SHA256-derived (key, IV, block counter). It is a
//! deterministic test fixture, NOT a hardware-backed cipher.
//!
//! Tests use the invocation counters and failure injection to observe what
//! actually crossed the boundary.

use super::client::{SessionHandle, TeeClient};
use super::protocol::{
    Algorithm, CommandId, ErrorOrigin, KeySize, Mode, Operation, Param, ParamKind, TeecFailure,
    TeeStatus, AES_BLOCK_SIZE, SERVICE_UUID,
};
use log::{debug, warn};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;
use zeroize::Zeroizing;

const KEYSTREAM_BLOCK: usize = 32;

/// Engine state held inside the simulated secure world
#[derive(Default)]
struct Engine {
    spec: Option<(Algorithm, KeySize, Mode)>,
    key: Option<Zeroizing<Vec<u8>>>,
    iv: Option<[u8; AES_BLOCK_SIZE]>,
    /// Bytes of keystream consumed since the last SET_IV
    offset: u64,
}

/// Software trusted application implementing the cipher command protocol
pub struct SimulatedTrustedApp {
    service: Uuid,
    available: bool,
    context_live: bool,
    session: Option<SessionHandle>,
    next_handle: u32,
    engine: Engine,
    injected: HashMap<CommandId, TeeStatus>,
    truncated: HashSet<CommandId>,
    counts: HashMap<CommandId, u64>,
}

impl Default for SimulatedTrustedApp {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTrustedApp {
    pub fn new() -> Self {
        Self {
            service: SERVICE_UUID,
            available: true,
            context_live: false,
            session: None,
            next_handle: 1,
            engine: Engine::default(),
            injected: HashMap::new(),
            truncated: HashSet::new(),
            counts: HashMap::new(),
        }
    }

    /// A TEE that cannot be reached: context initialization fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Make every future invocation of `command` fail with `status`
    pub fn fail_command(&mut self, command: CommandId, status: TeeStatus) {
        self.injected.insert(command, status);
    }

    /// Make every future invocation of `command` succeed but hand back
    /// output buffers cut to half their length
    pub fn truncate_output(&mut self, command: CommandId) {
        self.truncated.insert(command);
    }

    pub fn clear_failures(&mut self) {
        self.injected.clear();
        self.truncated.clear();
    }

    /// How many times `command` reached the trusted application
    pub fn invocation_count(&self, command: CommandId) -> u64 {
        self.counts.get(&command).copied().unwrap_or(0)
    }

    pub fn total_invocations(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_context_live(&self) -> bool {
        self.context_live
    }

    pub fn has_open_session(&self) -> bool {
        self.session.is_some()
    }

    // --- Command handlers ---

    fn dispatch(&mut self, command: CommandId, op: &mut Operation) -> Result<(), TeeStatus> {
        match command {
            CommandId::Prepare => self.prepare(op),
            CommandId::SetKey => self.set_key(op),
            CommandId::SetIv => self.set_iv(op),
            CommandId::Cipher | CommandId::CipherData => self.cipher(op),
            CommandId::GenerateKey => self.generate_key(op),
        }
    }

    fn prepare(&mut self, op: &Operation) -> Result<(), TeeStatus> {
        expect_kinds(
            op,
            [
                ParamKind::ValueInput,
                ParamKind::ValueInput,
                ParamKind::ValueInput,
                ParamKind::None,
            ],
        )?;
        let algorithm = Algorithm::from_code(value_of(&op.params[0]))
            .ok_or(TeeStatus::BAD_PARAMETERS)?;
        let key_size =
            KeySize::from_code(value_of(&op.params[1])).ok_or(TeeStatus::BAD_PARAMETERS)?;
        let mode = Mode::from_code(value_of(&op.params[2])).ok_or(TeeStatus::BAD_PARAMETERS)?;
        if algorithm != Algorithm::Ctr {
            return Err(TeeStatus::NOT_SUPPORTED);
        }

        self.engine = Engine {
            spec: Some((algorithm, key_size, mode)),
            ..Engine::default()
        };
        Ok(())
    }

    fn set_key(&mut self, op: &Operation) -> Result<(), TeeStatus> {
        expect_kinds(
            op,
            [ParamKind::TempInput, ParamKind::None, ParamKind::None, ParamKind::None],
        )?;
        let (_, key_size, _) = self.engine.spec.ok_or(TeeStatus::BAD_STATE)?;
        let key = match &op.params[0] {
            Param::TempInput(bytes) => bytes,
            _ => return Err(TeeStatus::BAD_PARAMETERS),
        };
        if key.len() != key_size.bytes() {
            return Err(TeeStatus::BAD_PARAMETERS);
        }

        self.engine.key = Some(Zeroizing::new(key.clone()));
        self.engine.iv = None;
        Ok(())
    }

    fn set_iv(&mut self, op: &Operation) -> Result<(), TeeStatus> {
        expect_kinds(
            op,
            [ParamKind::TempInput, ParamKind::None, ParamKind::None, ParamKind::None],
        )?;
        if self.engine.key.is_none() {
            return Err(TeeStatus::BAD_STATE);
        }
        let iv: [u8; AES_BLOCK_SIZE] = match &op.params[0] {
            Param::TempInput(bytes) => bytes
                .as_slice()
                .try_into()
                .map_err(|_| TeeStatus::BAD_PARAMETERS)?,
            _ => return Err(TeeStatus::BAD_PARAMETERS),
        };

        self.engine.iv = Some(iv);
        self.engine.offset = 0;
        Ok(())
    }

    fn cipher(&mut self, op: &mut Operation) -> Result<(), TeeStatus> {
        expect_kinds(
            op,
            [ParamKind::TempInput, ParamKind::TempOutput, ParamKind::None, ParamKind::None],
        )?;
        let (key, iv) = match (&self.engine.key, self.engine.iv) {
            (Some(key), Some(iv)) => (key, iv),
            _ => return Err(TeeStatus::BAD_STATE),
        };

        let [first, second, _, _] = &mut op.params;
        let (input, output) = match (first, second) {
            (Param::TempInput(input), Param::TempOutput(output)) => (input, output),
            _ => return Err(TeeStatus::BAD_PARAMETERS),
        };
        if output.len() < input.len() {
            return Err(TeeStatus::SHORT_BUFFER);
        }

        let keystream = keystream(key, &iv, self.engine.offset, input.len());
        for (i, byte) in input.iter().enumerate() {
            output[i] = byte ^ keystream[i];
        }
        self.engine.offset += input.len() as u64;
        Ok(())
    }

    fn generate_key(&mut self, op: &mut Operation) -> Result<(), TeeStatus> {
        expect_kinds(
            op,
            [ParamKind::TempOutput, ParamKind::None, ParamKind::None, ParamKind::None],
        )?;
        match &mut op.params[0] {
            Param::TempOutput(buf) if !buf.is_empty() => {
                rand::thread_rng().fill_bytes(buf);
                Ok(())
            }
            _ => Err(TeeStatus::BAD_PARAMETERS),
        }
    }
}

impl TeeClient for SimulatedTrustedApp {
    fn initialize_context(&mut self) -> Result<(), TeeStatus> {
        if !self.available {
            return Err(TeeStatus::COMMUNICATION);
        }
        self.context_live = true;
        Ok(())
    }

    fn open_session(&mut self, service: &Uuid) -> Result<SessionHandle, TeecFailure> {
        if !self.context_live {
            return Err(TeecFailure::new(TeeStatus::BAD_STATE, ErrorOrigin::Api));
        }
        if *service != self.service {
            return Err(TeecFailure::new(TeeStatus::ITEM_NOT_FOUND, ErrorOrigin::Tee));
        }
        if self.session.is_some() {
            return Err(TeecFailure::new(TeeStatus::ACCESS_DENIED, ErrorOrigin::TrustedApp));
        }

        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;
        self.session = Some(handle);
        self.engine = Engine::default();
        Ok(handle)
    }

    fn invoke_command(
        &mut self,
        session: SessionHandle,
        command: u32,
        operation: &mut Operation,
    ) -> Result<(), TeecFailure> {
        if self.session != Some(session) {
            return Err(TeecFailure::new(TeeStatus::BAD_STATE, ErrorOrigin::Api));
        }
        let command = CommandId::from_code(command).ok_or(TeecFailure::new(
            TeeStatus::NOT_SUPPORTED,
            ErrorOrigin::TrustedApp,
        ))?;
        *self.counts.entry(command).or_insert(0) += 1;

        if let Some(status) = self.injected.get(&command) {
            warn!("Simulated TA failing {} with injected {}", command, status);
            return Err(TeecFailure::new(*status, ErrorOrigin::TrustedApp));
        }

        self.dispatch(command, operation).map_err(|status| {
            debug!("Simulated TA rejected {} with {}", command, status);
            TeecFailure::new(status, ErrorOrigin::TrustedApp)
        })?;

        if self.truncated.contains(&command) {
            warn!("Simulated TA truncating output of {}", command);
            for param in operation.params.iter_mut() {
                if let Param::TempOutput(buf) = param {
                    buf.truncate(buf.len() / 2);
                }
            }
        }
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) {
        if self.session == Some(session) {
            self.session = None;
            self.engine = Engine::default();
        }
    }

    fn finalize_context(&mut self) {
        self.context_live = false;
    }
}

fn expect_kinds(op: &Operation, expected: [ParamKind; 4]) -> Result<(), TeeStatus> {
    if op.kinds() == expected {
        Ok(())
    } else {
        Err(TeeStatus::BAD_PARAMETERS)
    }
}

fn value_of(param: &Param) -> u32 {
    match param {
        Param::ValueInput { a, .. } => *a,
        _ => u32::MAX,
    }
}

/// Keystream bytes `[offset, offset + len)` for the given key and IV
fn keystream(key: &[u8], iv: &[u8], offset: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + KEYSTREAM_BLOCK);
    let mut block = offset / KEYSTREAM_BLOCK as u64;
    let skip = (offset % KEYSTREAM_BLOCK as u64) as usize;
    while out.len() < len + skip {
        let mut h = Sha256::new();
        h.update(b"teecrypt-sim-ctr-v1");
        h.update(key);
        h.update(iv);
        h.update(block.to_le_bytes());
        out.extend_from_slice(&h.finalize());
        block += 1;
    }
    out.drain(..skip);
    out.truncate(len);
    out
}
