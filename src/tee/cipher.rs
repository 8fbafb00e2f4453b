//! Cipher Context — host-side mirror of the trusted cipher engine's state
//!
//! The remote engine needs PREPARE, then SET_KEY, then SET_IV before it can
//! transform a buffer, and it forgets the key and IV whenever it is prepared
//! again. Its behavior on out-of-order commands is not something to rely on,
//! so the ordering is checked here before anything is sent.
//!
//! ```text
//! Uninitialized --prepare--> Prepared --set_key--> KeySet --set_iv--> Ready
//!       ^                        ^                    |                  |
//!       |                        +------prepare-------+------------------+
//!       +-- failed prepare
//! ```

use super::client::TeeClient;
use super::protocol::{Algorithm, CommandId, KeySize, Mode, Operation, AES_BLOCK_SIZE};
use super::session::{SecureSession, TeeError};
use log::debug;
use serde::{Deserialize, Serialize};

/// Where the engine is in its configuration sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherState {
    Uninitialized,
    Prepared,
    KeySet,
    Ready,
}

/// Parameters the engine was prepared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherSpec {
    pub algorithm: Algorithm,
    pub key_size: KeySize,
    pub mode: Mode,
}

/// Configured state of the remote cipher engine. Transient, one per run.
#[derive(Debug, Clone, Default)]
pub struct CipherContext {
    spec: Option<CipherSpec>,
    key_loaded: bool,
    iv_loaded: bool,
}

impl CipherContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CipherState {
        match (self.spec, self.key_loaded, self.iv_loaded) {
            (None, _, _) => CipherState::Uninitialized,
            (Some(_), false, _) => CipherState::Prepared,
            (Some(_), true, false) => CipherState::KeySet,
            (Some(_), true, true) => CipherState::Ready,
        }
    }

    pub fn spec(&self) -> Option<CipherSpec> {
        self.spec
    }

    pub fn mode(&self) -> Option<Mode> {
        self.spec.map(|s| s.mode)
    }

    pub fn key_loaded(&self) -> bool {
        self.key_loaded
    }

    pub fn iv_loaded(&self) -> bool {
        self.iv_loaded
    }

    pub fn is_ready(&self) -> bool {
        self.state() == CipherState::Ready
    }

    /// Select algorithm, key size and direction. Always legal; drops any
    /// loaded key and IV since the engine does not keep them.
    pub fn prepare<C: TeeClient>(
        &mut self,
        session: &mut SecureSession<C>,
        algorithm: Algorithm,
        key_size: KeySize,
        mode: Mode,
    ) -> Result<(), TeeError> {
        self.spec = None;
        self.key_loaded = false;
        self.iv_loaded = false;

        let mut op = Operation::prepare(algorithm, key_size, mode);
        session.invoke(CommandId::Prepare, &mut op)?;

        self.spec = Some(CipherSpec {
            algorithm,
            key_size,
            mode,
        });
        debug!("Cipher context prepared: {:?} {:?} {:?}", algorithm, key_size, mode);
        Ok(())
    }

    /// Load a key. Re-keying a ready context is allowed and requires a new IV.
    pub fn set_key<C: TeeClient>(
        &mut self,
        session: &mut SecureSession<C>,
        key: &[u8],
    ) -> Result<(), TeeError> {
        let spec = self.spec.ok_or(TeeError::ProtocolOrder {
            command: CommandId::SetKey,
            state: self.state(),
        })?;
        if key.len() != spec.key_size.bytes() {
            return Err(TeeError::InvalidKeyLength {
                expected: spec.key_size.bytes(),
                actual: key.len(),
            });
        }

        // A failed SET_KEY leaves neither key nor IV usable
        self.key_loaded = false;
        self.iv_loaded = false;
        let mut op = Operation::single_input(key);
        session.invoke(CommandId::SetKey, &mut op)?;

        self.key_loaded = true;
        debug!("Cipher key loaded ({} bytes)", key.len());
        Ok(())
    }

    /// Load the IV, resetting the engine's stream. Needs a loaded key.
    pub fn set_iv<C: TeeClient>(
        &mut self,
        session: &mut SecureSession<C>,
        iv: &[u8],
    ) -> Result<(), TeeError> {
        if !self.key_loaded {
            return Err(TeeError::ProtocolOrder {
                command: CommandId::SetIv,
                state: self.state(),
            });
        }
        if iv.len() != AES_BLOCK_SIZE {
            return Err(TeeError::InvalidIvLength {
                expected: AES_BLOCK_SIZE,
                actual: iv.len(),
            });
        }

        self.iv_loaded = false;
        let mut op = Operation::single_input(iv);
        session.invoke(CommandId::SetIv, &mut op)?;

        self.iv_loaded = true;
        debug!("Cipher IV loaded, context ready");
        Ok(())
    }

    /// Fail unless a transform command may be sent now
    pub fn ensure_ready(&self, command: CommandId) -> Result<(), TeeError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(TeeError::ProtocolOrder {
                command,
                state: self.state(),
            })
        }
    }
}
