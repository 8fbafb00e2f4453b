//! Secure Session — the single owned connection to the trusted application
//!
//! A `SecureSession` exists from a successful `open` until it is closed or
//! dropped. Closing consumes the value, so invoking after close or closing
//! twice cannot be expressed. Dropping a live session releases the session
//! and then the context, which covers early returns and unwinding.

use super::cipher::CipherState;
use super::client::{SessionHandle, TeeClient};
use super::protocol::{CommandId, ErrorOrigin, Operation, TeeStatus};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

/// An open session with the trusted application
pub struct SecureSession<C: TeeClient> {
    client: C,
    handle: Option<SessionHandle>,
    service: Uuid,
    opened_at: DateTime<Utc>,
    invocations: u64,
}

impl<C: TeeClient> SecureSession<C> {
    /// Connect to the TEE and open a session with the given service.
    ///
    /// If the session cannot be opened the already-initialized context is
    /// finalized before the error is returned.
    pub fn open(mut client: C, service: Uuid) -> Result<Self, TeeError> {
        if let Err(code) = client.initialize_context() {
            error!("TEE context initialization failed with code {}", code);
            return Err(TeeError::Connection { code });
        }

        let handle = match client.open_session(&service) {
            Ok(handle) => handle,
            Err(failure) => {
                error!(
                    "TEE open session failed with code {} origin {}",
                    failure.status, failure.origin
                );
                client.finalize_context();
                return Err(TeeError::Session {
                    code: failure.status,
                    origin: failure.origin,
                });
            }
        };

        info!("Secure session {} opened with service {}", handle.0, service);

        Ok(Self {
            client,
            handle: Some(handle),
            service,
            opened_at: Utc::now(),
            invocations: 0,
        })
    }

    /// Invoke one command and block until the trusted application answers
    pub fn invoke(&mut self, command: CommandId, operation: &mut Operation) -> Result<(), TeeError> {
        let handle = self
            .handle
            .ok_or(TeeError::Session {
                code: TeeStatus::BAD_STATE,
                origin: ErrorOrigin::Api,
            })?;

        self.invocations += 1;
        debug!("Invoking {} on session {}", command, handle.0);

        self.client
            .invoke_command(handle, command.code(), operation)
            .map_err(|failure| {
                error!(
                    "TEE invoke {} failed with code {} origin {}",
                    command, failure.status, failure.origin
                );
                TeeError::Command {
                    command,
                    code: failure.status,
                    origin: failure.origin,
                }
            })
    }

    /// Close the session, then finalize the context
    pub fn close(mut self) {
        self.release();
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn service(&self) -> &Uuid {
        &self.service
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Number of commands sent over this session
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.client.close_session(handle);
            self.client.finalize_context();
            info!(
                "Secure session {} closed after {} invocations",
                handle.0, self.invocations
            );
        }
    }
}

impl<C: TeeClient> Drop for SecureSession<C> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("Secure session dropped without close, releasing");
            self.release();
        }
    }
}

/// Errors raised while driving the trusted application
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("TEE context initialization failed with code {code}")]
    Connection { code: TeeStatus },

    #[error("TEE session failed with code {code} origin {origin}")]
    Session { code: TeeStatus, origin: ErrorOrigin },

    #[error("{command} issued out of order (cipher context is {state:?})")]
    ProtocolOrder { command: CommandId, state: CipherState },

    #[error("TEE command {command} failed with code {code} origin {origin}")]
    Command {
        command: CommandId,
        code: TeeStatus,
        origin: ErrorOrigin,
    },

    #[error("Buffer size mismatch: input {input} bytes, output {output} bytes")]
    SizeMismatch { input: usize, output: usize },

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    RecordNotFound(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TeeError {
    /// The trusted application reported success but returned less output
    /// than the operation asked for
    pub fn short_output(command: CommandId) -> Self {
        TeeError::Command {
            command,
            code: TeeStatus::SHORT_BUFFER,
            origin: ErrorOrigin::TrustedApp,
        }
    }

    /// Taxonomy label used when reporting a failure
    pub fn kind(&self) -> &'static str {
        match self {
            TeeError::Connection { .. } => "ConnectionError",
            TeeError::Session { .. } => "SessionError",
            TeeError::ProtocolOrder { .. } => "ProtocolOrderError",
            TeeError::Command { .. } => "CommandError",
            TeeError::SizeMismatch { .. } => "SizeMismatchError",
            TeeError::InvalidKeyLength { .. } | TeeError::InvalidIvLength { .. } => {
                "InvalidLengthError"
            }
            TeeError::Storage(_) | TeeError::RecordNotFound(_) => "StorageError",
            TeeError::Config(_) => "ConfigError",
        }
    }

    /// Contract violations caught on the host before any remote call
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            TeeError::ProtocolOrder { .. }
                | TeeError::SizeMismatch { .. }
                | TeeError::InvalidKeyLength { .. }
                | TeeError::InvalidIvLength { .. }
        )
    }

    /// Status code and origin for failures that came from the TEE
    pub fn status(&self) -> Option<(TeeStatus, Option<ErrorOrigin>)> {
        match self {
            TeeError::Connection { code } => Some((*code, None)),
            TeeError::Session { code, origin } | TeeError::Command { code, origin, .. } => {
                Some((*code, Some(*origin)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::protocol::TeecFailure;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Client that records every API call in order
    struct RecordingClient {
        events: Rc<RefCell<Vec<&'static str>>>,
        fail_context: bool,
        fail_session: bool,
    }

    impl RecordingClient {
        fn new(events: Rc<RefCell<Vec<&'static str>>>) -> Self {
            Self {
                events,
                fail_context: false,
                fail_session: false,
            }
        }
    }

    impl TeeClient for RecordingClient {
        fn initialize_context(&mut self) -> Result<(), TeeStatus> {
            self.events.borrow_mut().push("init");
            if self.fail_context {
                Err(TeeStatus::COMMUNICATION)
            } else {
                Ok(())
            }
        }

        fn open_session(&mut self, _service: &Uuid) -> Result<SessionHandle, TeecFailure> {
            self.events.borrow_mut().push("open");
            if self.fail_session {
                Err(TeecFailure::new(TeeStatus::ITEM_NOT_FOUND, ErrorOrigin::Tee))
            } else {
                Ok(SessionHandle(7))
            }
        }

        fn invoke_command(
            &mut self,
            _session: SessionHandle,
            command: u32,
            _operation: &mut Operation,
        ) -> Result<(), TeecFailure> {
            self.events.borrow_mut().push("invoke");
            if command == CommandId::Cipher.code() {
                Err(TeecFailure::new(TeeStatus::BAD_PARAMETERS, ErrorOrigin::TrustedApp))
            } else {
                Ok(())
            }
        }

        fn close_session(&mut self, _session: SessionHandle) {
            self.events.borrow_mut().push("close");
        }

        fn finalize_context(&mut self) {
            self.events.borrow_mut().push("finalize");
        }
    }

    #[test]
    fn test_open_and_close_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let session =
            SecureSession::open(RecordingClient::new(events.clone()), Uuid::nil()).unwrap();
        session.close();
        assert_eq!(*events.borrow(), vec!["init", "open", "close", "finalize"]);
    }

    #[test]
    fn test_drop_releases_once() {
        let events = Rc::new(RefCell::new(Vec::new()));
        {
            let _session =
                SecureSession::open(RecordingClient::new(events.clone()), Uuid::nil()).unwrap();
        }
        assert_eq!(*events.borrow(), vec!["init", "open", "close", "finalize"]);
    }

    #[test]
    fn test_connection_failure() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut client = RecordingClient::new(events.clone());
        client.fail_context = true;

        let err = SecureSession::open(client, Uuid::nil()).err().unwrap();
        assert!(matches!(err, TeeError::Connection { code } if code == TeeStatus::COMMUNICATION));
        assert_eq!(err.kind(), "ConnectionError");
        assert_eq!(*events.borrow(), vec!["init"]);
    }

    #[test]
    fn test_session_failure_finalizes_context() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut client = RecordingClient::new(events.clone());
        client.fail_session = true;

        let err = SecureSession::open(client, Uuid::nil()).err().unwrap();
        match err {
            TeeError::Session { code, origin } => {
                assert_eq!(code, TeeStatus::ITEM_NOT_FOUND);
                assert_eq!(origin, ErrorOrigin::Tee);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(*events.borrow(), vec!["init", "open", "finalize"]);
    }

    #[test]
    fn test_command_failure_keeps_status_and_origin() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut session =
            SecureSession::open(RecordingClient::new(events), Uuid::nil()).unwrap();

        let mut op = Operation::transform(&[0u8; 16]);
        let err = session.invoke(CommandId::Cipher, &mut op).unwrap_err();
        assert_eq!(
            err.status(),
            Some((TeeStatus::BAD_PARAMETERS, Some(ErrorOrigin::TrustedApp)))
        );
        assert!(!err.is_local());
        assert_eq!(session.invocations(), 1);

        session.invoke(CommandId::SetIv, &mut Operation::new()).unwrap();
        assert_eq!(session.invocations(), 2);
    }
}
