//! Command protocol — wire encoding for the trusted cipher application
//!
//! Every request to the trusted application is a command id plus an
//! `Operation` of up to four parameters. Parameter shapes mirror the
//! GlobalPlatform TEE client API: small value inputs, and temporary memory
//! references that are copied in (input) or filled by the TEE (output).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Service identifier of the trusted cipher application
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x8aaa_f200_2450_11e4_abe2_0002_a5d5_c51b);

/// AES block size; also the IV size
pub const AES_BLOCK_SIZE: usize = 16;

/// Default record payload size handled per transform
pub const DATA_BLOCK_SIZE: usize = 128;

/// Number of parameter slots in a single operation
pub const PARAM_COUNT: usize = 4;

/// Commands understood by the trusted application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandId {
    Prepare,
    SetKey,
    SetIv,
    Cipher,
    CipherData,
    GenerateKey,
}

impl CommandId {
    /// Wire value sent to the trusted application
    pub fn code(self) -> u32 {
        match self {
            CommandId::Prepare => 0,
            CommandId::SetKey => 1,
            CommandId::SetIv => 2,
            CommandId::Cipher => 3,
            CommandId::CipherData => 4,
            CommandId::GenerateKey => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(CommandId::Prepare),
            1 => Some(CommandId::SetKey),
            2 => Some(CommandId::SetIv),
            3 => Some(CommandId::Cipher),
            4 => Some(CommandId::CipherData),
            5 => Some(CommandId::GenerateKey),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandId::Prepare => "PREPARE",
            CommandId::SetKey => "SET_KEY",
            CommandId::SetIv => "SET_IV",
            CommandId::Cipher => "CIPHER",
            CommandId::CipherData => "CIPHER_DATA",
            CommandId::GenerateKey => "GENERATE_KEY",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cipher algorithm selected by PREPARE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Ecb,
    Cbc,
    Ctr,
}

impl Algorithm {
    pub fn code(self) -> u32 {
        match self {
            Algorithm::Ecb => 0,
            Algorithm::Cbc => 1,
            Algorithm::Ctr => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Algorithm::Ecb),
            1 => Some(Algorithm::Cbc),
            2 => Some(Algorithm::Ctr),
            _ => None,
        }
    }
}

/// AES key size selected by PREPARE. Encoded as the key length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySize {
    #[serde(rename = "aes128")]
    Aes128,
    #[serde(rename = "aes256")]
    Aes256,
}

impl KeySize {
    pub fn bytes(self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes256 => 32,
        }
    }

    pub fn code(self) -> u32 {
        self.bytes() as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            16 => Some(KeySize::Aes128),
            32 => Some(KeySize::Aes256),
            _ => None,
        }
    }
}

/// Direction of the cipher engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Encode,
    Decode,
}

impl Mode {
    pub fn code(self) -> u32 {
        match self {
            Mode::Decode => 0,
            Mode::Encode => 1,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Mode::Decode),
            1 => Some(Mode::Encode),
            _ => None,
        }
    }
}

/// GlobalPlatform result code returned by the client API or the trusted app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeeStatus(pub u32);

impl TeeStatus {
    pub const SUCCESS: TeeStatus = TeeStatus(0x0000_0000);
    pub const GENERIC: TeeStatus = TeeStatus(0xFFFF_0000);
    pub const ACCESS_DENIED: TeeStatus = TeeStatus(0xFFFF_0001);
    pub const BAD_FORMAT: TeeStatus = TeeStatus(0xFFFF_0005);
    pub const BAD_PARAMETERS: TeeStatus = TeeStatus(0xFFFF_0006);
    pub const BAD_STATE: TeeStatus = TeeStatus(0xFFFF_0007);
    pub const ITEM_NOT_FOUND: TeeStatus = TeeStatus(0xFFFF_0008);
    pub const NOT_SUPPORTED: TeeStatus = TeeStatus(0xFFFF_000A);
    pub const OUT_OF_MEMORY: TeeStatus = TeeStatus(0xFFFF_000C);
    pub const COMMUNICATION: TeeStatus = TeeStatus(0xFFFF_000E);
    pub const SHORT_BUFFER: TeeStatus = TeeStatus(0xFFFF_0010);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for TeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Layer that produced a failure status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorOrigin {
    /// Client API on the host
    Api,
    /// Transport between host and secure world
    Comms,
    /// Secure-world OS
    Tee,
    /// The trusted application itself
    TrustedApp,
}

impl ErrorOrigin {
    pub fn code(self) -> u32 {
        match self {
            ErrorOrigin::Api => 1,
            ErrorOrigin::Comms => 2,
            ErrorOrigin::Tee => 3,
            ErrorOrigin::TrustedApp => 4,
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.code())
    }
}

/// A status paired with the layer it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeecFailure {
    pub status: TeeStatus,
    pub origin: ErrorOrigin,
}

impl TeecFailure {
    pub fn new(status: TeeStatus, origin: ErrorOrigin) -> Self {
        Self { status, origin }
    }
}

/// One parameter slot of an operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Param {
    #[default]
    None,
    /// Two 32-bit values passed by copy
    ValueInput { a: u32, b: u32 },
    /// Buffer copied into the secure world
    TempInput(Vec<u8>),
    /// Buffer the secure world fills; its length is the capacity offered
    TempOutput(Vec<u8>),
}

impl Param {
    pub fn value(a: u32) -> Self {
        Param::ValueInput { a, b: 0 }
    }

    /// Short shape tag used when the trusted app checks parameter types
    pub fn kind(&self) -> ParamKind {
        match self {
            Param::None => ParamKind::None,
            Param::ValueInput { .. } => ParamKind::ValueInput,
            Param::TempInput(_) => ParamKind::TempInput,
            Param::TempOutput(_) => ParamKind::TempOutput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    None,
    ValueInput,
    TempInput,
    TempOutput,
}

/// The parameter block of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    pub params: [Param; PARAM_COUNT],
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: [Param; PARAM_COUNT]) -> Self {
        Self { params }
    }

    pub fn kinds(&self) -> [ParamKind; PARAM_COUNT] {
        [
            self.params[0].kind(),
            self.params[1].kind(),
            self.params[2].kind(),
            self.params[3].kind(),
        ]
    }

    /// PREPARE: algorithm, key size and mode as value inputs
    pub fn prepare(algorithm: Algorithm, key_size: KeySize, mode: Mode) -> Self {
        Self::with_params([
            Param::value(algorithm.code()),
            Param::value(key_size.code()),
            Param::value(mode.code()),
            Param::None,
        ])
    }

    /// SET_KEY / SET_IV: a single input buffer
    pub fn single_input(bytes: &[u8]) -> Self {
        Self::with_params([Param::TempInput(bytes.to_vec()), Param::None, Param::None, Param::None])
    }

    /// CIPHER / CIPHER_DATA: input buffer and an output buffer of the same size
    pub fn transform(input: &[u8]) -> Self {
        Self::with_params([
            Param::TempInput(input.to_vec()),
            Param::TempOutput(vec![0u8; input.len()]),
            Param::None,
            Param::None,
        ])
    }

    /// GENERATE_KEY: one output buffer sized for the key
    pub fn generate_key(key_len: usize) -> Self {
        Self::with_params([Param::TempOutput(vec![0u8; key_len]), Param::None, Param::None, Param::None])
    }

    /// Take the contents of an output slot after a successful invoke
    pub fn take_output(&mut self, index: usize) -> Option<Vec<u8>> {
        match std::mem::take(&mut self.params[index]) {
            Param::TempOutput(buf) => Some(buf),
            other => {
                self.params[index] = other;
                None
            }
        }
    }
}
