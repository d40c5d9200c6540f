//! Client for the controller executable.

use super::device::{Device, DeviceId};
use super::process::{self, CancelFlag, ProcessOutput, RunError};
use super::protocol;
use super::{ControllerError, DeviceController};
use crate::config::ControllerConfig;
use crate::integrity::{self, IntegrityError, IntegrityRecord, TrustFailure};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs the controller executable after checking it against the pinned digest.
pub struct ControllerClient {
    path: PathBuf,
    list_args: Vec<String>,
    timeout: Duration,
    trust: IntegrityRecord,
    cancel: CancelFlag,
}

impl ControllerClient {
    /// Create a client for the controller at `path`.
    pub fn new(path: impl Into<PathBuf>, list_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            list_args,
            timeout,
            trust: IntegrityRecord::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.resolved_path(), config.list_args.clone(), config.timeout())
    }

    pub fn with_trust(mut self, record: IntegrityRecord) -> Self {
        self.trust = record;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flag that aborts the controller call currently in flight.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The file a controller call would hash and execute: the configured
    /// path made absolute, with symlinks resolved. A bare name is taken
    /// relative to the working directory and never looked up on `PATH`.
    pub fn executable(&self) -> Option<PathBuf> {
        std::fs::canonicalize(&self.path)
            .ok()
            .filter(|path| path.is_file())
    }

    /// Resolve the controller and check it against the pinned digest.
    /// Returns the exact path that passed, which is the one to run.
    pub fn check_trust(&self) -> Result<PathBuf, TrustFailure> {
        if !self.trust.is_configured() {
            return Err(TrustFailure::NotConfigured);
        }
        let executable = self.executable().ok_or(TrustFailure::Missing)?;
        integrity::check(&executable, &self.trust.expected_hash)?;
        Ok(executable)
    }

    fn ensure_trusted(&self) -> Result<PathBuf, ControllerError> {
        self.check_trust().map_err(ControllerError::Untrusted)
    }

    fn invoke(&self, executable: &Path, args: &[String]) -> Result<ProcessOutput, ControllerError> {
        process::run(executable, args, self.timeout, &self.cancel).map_err(|e| match e {
            RunError::Launch(source) => ControllerError::ProcessLaunchFailed {
                path: executable.to_path_buf(),
                source,
            },
            RunError::Timeout(t) => ControllerError::Timeout(t),
            RunError::Cancelled => ControllerError::Cancelled,
            RunError::Io(e) => ControllerError::Io(e),
        })
    }
}

impl DeviceController for ControllerClient {
    fn list_devices(&self) -> Result<Vec<Device>, ControllerError> {
        let executable = self.ensure_trusted()?;

        let output = self.invoke(&executable, &self.list_args)?;
        if !output.status.success() {
            warn!("Controller listing exited with {}", output.status);
        }

        let devices = protocol::parse_device_list_bytes(&output.stdout)?;
        debug!("Controller listed {} devices", devices.len());
        Ok(devices)
    }

    fn activate_device(&self, id: DeviceId) -> Result<(), ControllerError> {
        let executable = self.ensure_trusted()?;

        let output = self.invoke(&executable, &[id.to_string()])?;
        if !output.status.success() {
            return Err(ControllerError::ActivationFailed {
                id,
                status: output.status.to_string(),
            });
        }

        info!("Activated device {}", id);
        Ok(())
    }

    fn begin_command(&self) {
        // A cancellation left over from the previous command must not abort
        // this one.
        self.cancel.reset();
    }

    fn record_trust(&self) -> Result<String, ControllerError> {
        let executable =
            std::fs::canonicalize(&self.path).map_err(|source| IntegrityError::Io {
                path: self.path.clone(),
                source,
            })?;
        let digest = integrity::record_digest(&executable)?;
        info!("Computed controller digest {} for {}", digest, executable.display());
        Ok(digest)
    }

    fn set_trust(&mut self, record: IntegrityRecord) {
        self.trust = record;
    }
}
