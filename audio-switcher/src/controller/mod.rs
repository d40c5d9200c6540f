//! Controller executable interaction.
//!
//! Device enumeration and activation are delegated to an external
//! controller binary. This module launches it, checks its integrity before
//! every use, and parses what it prints.

pub mod client;
pub mod device;
pub mod process;
pub mod protocol;

pub use client::ControllerClient;
pub use device::{Device, DeviceEntry, DeviceId};
pub use process::CancelFlag;
pub use protocol::ProtocolViolation;

use crate::integrity::{IntegrityError, IntegrityRecord, TrustFailure};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Controller service error types.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Controller is not trusted: {0}")]
    Untrusted(#[source] TrustFailure),

    #[error("Failed to launch controller {}: {source}", path.display())]
    ProcessLaunchFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Controller output violates protocol: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("Controller failed to activate device {id} ({status})")]
    ActivationFailed { id: DeviceId, status: String },

    #[error("Controller did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Controller call was cancelled")]
    Cancelled,

    #[error("Controller I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to hash controller: {0}")]
    Integrity(#[from] IntegrityError),
}

impl ControllerError {
    /// Errors after which the controller can no longer be relied upon.
    pub fn is_session_ending(&self) -> bool {
        matches!(
            self,
            ControllerError::Untrusted(_) | ControllerError::ProtocolViolation(_)
        )
    }
}

/// The operations the session needs from a controller.
pub trait DeviceController {
    /// Enumerate output devices in the order the controller reports them.
    fn list_devices(&self) -> Result<Vec<Device>, ControllerError>;

    /// Make `id` the system default output device.
    fn activate_device(&self, id: DeviceId) -> Result<(), ControllerError>;

    /// Called by the session at the start of each command.
    fn begin_command(&self) {}

    /// Compute the digest of the controller binary currently on disk.
    fn record_trust(&self) -> Result<String, ControllerError>;

    /// Replace the digest the controller is verified against.
    fn set_trust(&mut self, record: IntegrityRecord);
}
