//! TEE client primitive — the host-side entry point into the secure world
//!
//! `TeeClient` is the seam between the orchestration core and whatever
//! actually talks to the trusted application: the simulated application in
//! this crate, or a binding to a vendor client library. The shape follows
//! the GlobalPlatform client API: initialize a context, open a session on a
//! service id, invoke commands, close the session, finalize the context.

use super::protocol::{Operation, TeecFailure, TeeStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session handle issued by the client on `open_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

/// Host-side TEE client API
pub trait TeeClient {
    /// Connect to the TEE. Failure status has no origin: it is always the API.
    fn initialize_context(&mut self) -> Result<(), TeeStatus>;

    /// Open a session against a trusted application service id
    fn open_session(&mut self, service: &Uuid) -> Result<SessionHandle, TeecFailure>;

    /// Invoke one command synchronously. Output parameters are filled in place.
    fn invoke_command(
        &mut self,
        session: SessionHandle,
        command: u32,
        operation: &mut Operation,
    ) -> Result<(), TeecFailure>;

    fn close_session(&mut self, session: SessionHandle);

    fn finalize_context(&mut self);
}

/// Which kind of TEE the host can see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeeBackend {
    /// ARM TrustZone via a kernel TEE driver
    ArmTrustZone,
    /// In-process simulated trusted application
    Simulated,
}

impl TeeBackend {
    pub fn name(&self) -> &str {
        match self {
            TeeBackend::ArmTrustZone => "ARM TrustZone",
            TeeBackend::Simulated => "Simulated (software)",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, TeeBackend::Simulated)
    }

    /// Detect a TEE driver device node on this host
    pub fn probe() -> Self {
        let present = ["/dev/tee0", "/dev/teepriv0", "/dev/opteearmtz00"]
            .iter()
            .any(|p| std::path::Path::new(p).exists());
        if present {
            TeeBackend::ArmTrustZone
        } else {
            TeeBackend::Simulated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert!(TeeBackend::ArmTrustZone.is_hardware());
        assert!(!TeeBackend::Simulated.is_hardware());
        assert_eq!(TeeBackend::Simulated.name(), "Simulated (software)");
    }

    #[test]
    fn test_probe_returns_a_backend() {
        let backend = TeeBackend::probe();
        assert!(matches!(
            backend,
            TeeBackend::ArmTrustZone | TeeBackend::Simulated
        ));
    }
}
