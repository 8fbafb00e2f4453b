//! TEE (Trusted Execution Environment) — host side of the cipher protocol
//!
//! - **Protocol**: command ids, parameter shapes, status codes
//! - **Client**: the context / session / invoke primitive (`TeeClient`)
//! - **Session**: the owned secure session every command flows through
//! - **Cipher**: local state machine enforcing PREPARE → SET_KEY → SET_IV
//! - **Simulated**: software trusted application for tests and the CLI

pub mod protocol;
pub mod client;
pub mod session;
pub mod cipher;
pub mod simulated;

pub use protocol::{
    Algorithm, CommandId, ErrorOrigin, KeySize, Mode, Operation, Param, TeeStatus,
    TeecFailure, AES_BLOCK_SIZE, DATA_BLOCK_SIZE, SERVICE_UUID,
};
pub use client::{SessionHandle, TeeBackend, TeeClient};
pub use session::{SecureSession, TeeError};
pub use cipher::{CipherContext, CipherSpec, CipherState};
pub use simulated::SimulatedTrustedApp;
