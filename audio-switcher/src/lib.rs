//! AudioSwitcher - Library
//!
//! Cycles the system's default audio output through a user-curated set of
//! devices, driving an external controller executable that does the actual
//! enumeration and switching.
//!
//! ## Features
//!
//! - Parse the controller's `id|name|…|active` device listing
//! - Ordered rotation through enabled devices, persisted across runs
//! - SHA-256 pinning of the controller binary, checked before every call
//! - Bounded, cancellable controller invocations
//! - Tray icon host on Windows

pub mod app;
pub mod config;
pub mod controller;
pub mod integrity;
pub mod platform;
pub mod selection;
pub mod session;
pub mod store;
#[cfg(windows)]
pub mod ui;

pub use app::{AppHandle, Command, Notification};
pub use config::{AppConfig, ConfigError, ControllerConfig, StateConfig};
pub use controller::{
    CancelFlag, ControllerClient, ControllerError, Device, DeviceController, DeviceEntry, DeviceId,
};
pub use integrity::{IntegrityError, IntegrityRecord, TrustFailure};
pub use selection::DeviceRegistry;
pub use session::{EventLog, EventSink, Session, SessionError, SessionEvent, SessionOptions};
pub use store::{FileStateStore, MemoryStateStore, PersistedState, StateStore, StoreError};
