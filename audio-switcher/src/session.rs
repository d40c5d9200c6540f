//! Session coordination.
//!
//! [`Session`] is the single entry point for UI glue. It runs each command
//! to completion against the controller, keeps the registry and persisted
//! state in step, and turns controller failures into user-facing events.

use crate::controller::{ControllerError, Device, DeviceController, DeviceEntry, DeviceId};
use crate::integrity::{IntegrityRecord, TrustFailure};
use crate::selection::DeviceRegistry;
use crate::store::{PersistedState, StateStore, StoreError};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};

/// Tooltip shown before anything has been selected.
pub const APP_NAME: &str = "AudioSwitcher";

/// Notifications for the UI glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New status line, e.g. the tray tooltip
    Status(String),

    /// Something the user should be told about
    Error(String),

    /// The session cannot continue; the UI should exit
    Terminate { reason: String },
}

/// Receiver of [`SessionEvent`]s.
pub trait EventSink {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

/// Collects events in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<SessionEvent>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.0
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: SessionEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }
}

/// Session error types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("No devices are enabled for rotation")]
    NothingEnabled,

    #[error("Device {0} is not listed by the controller")]
    NotListed(DeviceId),

    #[error("Session has ended")]
    Terminated,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Save after every change instead of only at shutdown
    pub write_through: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            write_through: true,
        }
    }
}

/// Orchestrates controller, registry and persistence for one run.
pub struct Session<C, S> {
    controller: C,
    store: S,
    registry: DeviceRegistry,
    trust: IntegrityRecord,
    events: Box<dyn EventSink + Send>,
    options: SessionOptions,
    terminated: bool,
}

impl<C: DeviceController, S: StateStore> Session<C, S> {
    /// Restore persisted state and hand the pinned digest to the controller.
    ///
    /// Unreadable state is logged and replaced with an empty one.
    pub fn open(
        mut controller: C,
        store: S,
        events: Box<dyn EventSink + Send>,
        options: SessionOptions,
    ) -> Self {
        let state = store.load().unwrap_or_else(|e| {
            warn!("Failed to load saved state, starting empty: {}", e);
            PersistedState::default()
        });

        let registry = DeviceRegistry::from_parts(state.enabled_devices, state.last_device);
        let trust = IntegrityRecord::new(state.controller_digest);
        info!(
            "Loaded {} enabled devices (controller {})",
            registry.enabled_order().len(),
            if trust.is_configured() {
                "pinned"
            } else {
                "not pinned"
            }
        );
        controller.set_trust(trust.clone());

        Self {
            controller,
            store,
            registry,
            trust,
            events,
            options,
            terminated: false,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn trust(&self) -> &IntegrityRecord {
        &self.trust
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// List devices joined with their rotation membership.
    ///
    /// Failures are reported through the event sink and yield an empty list.
    pub fn request_device_list(&mut self) -> Vec<DeviceEntry> {
        self.try_device_list().unwrap_or_default()
    }

    /// Same as [`request_device_list`](Self::request_device_list), but also
    /// returns the failure to the caller.
    pub fn try_device_list(&mut self) -> Result<Vec<DeviceEntry>, SessionError> {
        self.begin_command()?;
        let devices = self.controller.list_devices().map_err(|e| self.fail(e))?;
        Ok(devices
            .into_iter()
            .map(|device| DeviceEntry {
                enabled: self.registry.is_enabled(device.id),
                device,
            })
            .collect())
    }

    /// Activate the next enabled device after the current one.
    pub fn cycle_to_next(&mut self) -> Result<Device, SessionError> {
        self.begin_command()?;
        let target = self
            .registry
            .next(self.registry.current())
            .ok_or(SessionError::NothingEnabled)?;
        self.activate(target)
    }

    /// Activate `id` directly, moving the rotation cursor to it.
    pub fn select_device(&mut self, id: DeviceId) -> Result<Device, SessionError> {
        self.begin_command()?;
        self.activate(id)
    }

    /// Flip rotation membership of `id`. Returns whether it is now enabled.
    pub fn toggle_enabled(&mut self, id: DeviceId) -> Result<bool, SessionError> {
        self.begin_command()?;
        let enabled = self.registry.toggle(id);
        self.changed();
        Ok(enabled)
    }

    /// Pin the controller binary currently on disk as trusted.
    pub fn record_controller_trust(&mut self) -> Result<String, SessionError> {
        self.begin_command()?;
        let digest = self.controller.record_trust().map_err(|e| self.fail(e))?;

        self.trust = IntegrityRecord::new(digest.clone());
        self.controller.set_trust(self.trust.clone());
        info!("Pinned controller digest {}", digest);
        self.events
            .emit(SessionEvent::Status(format!("Controller trusted ({})", short(&digest))));
        self.changed();
        Ok(digest)
    }

    /// Persist state and end the session.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        self.terminated = true;
        self.persist()?;
        info!("Session shut down");
        Ok(())
    }

    fn activate(&mut self, id: DeviceId) -> Result<Device, SessionError> {
        // Cursor only moves once the controller confirms, so a retry after a
        // failure aims at the same device.
        self.controller
            .activate_device(id)
            .map_err(|e| self.fail(e))?;
        self.registry.set_current(id);
        self.changed();

        // Names can change between listings; never show a cached one.
        let devices = self.controller.list_devices().map_err(|e| self.fail(e))?;
        match devices.into_iter().find(|d| d.id == id) {
            Some(device) => {
                self.events
                    .emit(SessionEvent::Status(format!("Playing: {}", device.name)));
                Ok(device)
            }
            None => {
                warn!("Activated device {} is missing from the listing", id);
                self.events.emit(SessionEvent::Error(format!(
                    "Device {} is no longer available.",
                    id
                )));
                Err(SessionError::NotListed(id))
            }
        }
    }

    fn begin_command(&self) -> Result<(), SessionError> {
        if self.terminated {
            return Err(SessionError::Terminated);
        }
        self.controller.begin_command();
        Ok(())
    }

    fn fail(&mut self, e: ControllerError) -> SessionError {
        self.report(&e);
        SessionError::Controller(e)
    }

    fn report(&mut self, e: &ControllerError) {
        warn!("Controller call failed: {}", e);
        self.events.emit(SessionEvent::Error(user_message(e)));
        if e.is_session_ending() {
            self.terminate(e.to_string());
        }
    }

    fn terminate(&mut self, reason: String) {
        error!("Ending session: {}", reason);
        self.terminated = true;
        if let Err(e) = self.persist() {
            error!("Failed to save state on termination: {}", e);
        }
        self.events.emit(SessionEvent::Terminate { reason });
    }

    fn changed(&mut self) {
        if !self.options.write_through {
            return;
        }
        if let Err(e) = self.persist() {
            error!("Failed to save state: {}", e);
            self.events
                .emit(SessionEvent::Error(format!("Could not save settings: {}", e)));
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.snapshot())
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState {
            enabled_devices: self.registry.enabled_order().to_vec(),
            last_device: self.registry.current(),
            controller_digest: self.trust.expected_hash.clone(),
        }
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Text shown to the user for a controller failure.
pub fn user_message(e: &ControllerError) -> String {
    match e {
        ControllerError::Untrusted(TrustFailure::NotConfigured) => {
            "The audio controller has not been trusted yet. Run `audio-switcher trust` to pin it."
                .to_string()
        }
        ControllerError::Untrusted(reason) => format!(
            "The audio controller failed its integrity check: {}. AudioSwitcher will exit.",
            reason
        ),
        ControllerError::ProcessLaunchFailed { path, source } => format!(
            "Could not start the audio controller {}: {}",
            path.display(),
            source
        ),
        ControllerError::ProtocolViolation(v) => format!(
            "The audio controller returned unexpected output ({}). AudioSwitcher will exit.",
            v
        ),
        ControllerError::ActivationFailed { id, .. } => {
            format!("Could not switch to device {}.", id)
        }
        ControllerError::Timeout(_) => "The audio controller did not respond in time.".to_string(),
        ControllerError::Cancelled => "The device switch was cancelled.".to_string(),
        ControllerError::Io(e) => format!("Audio controller I/O error: {}", e),
        ControllerError::Integrity(e) => format!("Could not read the audio controller: {}", e),
    }
}
