//! FFI bindings for AudioSwitcher.
//!
//! C ABI over a [`Session`] for hosts that bring their own UI, e.g. .NET via
//! P/Invoke. Structured data crosses the boundary as JSON. All functions use
//! panic::catch_unwind to prevent Rust panics from unwinding across the FFI
//! boundary.
//!
//! One call runs at a time per engine; an overlapping call fails with
//! [`ErrorCode::Busy`]. [`switcher_engine_cancel`] is the exception and may
//! be called from any thread while another call is in flight.

use audio_switcher::{
    store, AppConfig, CancelFlag, ControllerClient, ControllerError, DeviceEntry, EventLog,
    FileStateStore, Session, SessionError, SessionEvent, SessionOptions, StateStore,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, UnwindSafe};
use std::ptr;
use std::sync::{Mutex, TryLockError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    Untrusted = -4,
    LaunchFailed = -5,
    ProtocolViolation = -6,
    ActivationFailed = -7,
    Timeout = -8,
    Cancelled = -9,
    NothingEnabled = -10,
    Terminated = -11,
    StoreError = -12,
    IoError = -13,
    JsonError = -14,
    ConfigError = -15,
    Busy = -16,
    Panic = -99,
}

impl From<&SessionError> for ErrorCode {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Controller(e) => match e {
                ControllerError::Untrusted(_) => ErrorCode::Untrusted,
                ControllerError::ProcessLaunchFailed { .. } => ErrorCode::LaunchFailed,
                ControllerError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
                ControllerError::ActivationFailed { .. } => ErrorCode::ActivationFailed,
                ControllerError::Timeout(_) => ErrorCode::Timeout,
                ControllerError::Cancelled => ErrorCode::Cancelled,
                ControllerError::Io(_) | ControllerError::Integrity(_) => ErrorCode::IoError,
            },
            SessionError::NothingEnabled => ErrorCode::NothingEnabled,
            SessionError::NotListed(_) => ErrorCode::DeviceNotFound,
            SessionError::Terminated => ErrorCode::Terminated,
            SessionError::Store(_) => ErrorCode::StoreError,
        }
    }
}

type FfiError = (ErrorCode, String);

fn session_error(err: SessionError) -> FfiError {
    (ErrorCode::from(&err), err.to_string())
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// A device joined with its rotation membership.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: i32,
    pub name: String,
    pub active: bool,
    pub enabled: bool,
}

impl From<DeviceEntry> for DeviceDto {
    fn from(entry: DeviceEntry) -> Self {
        Self {
            id: entry.device.id.0,
            name: entry.device.name,
            active: entry.device.active,
            enabled: entry.enabled,
        }
    }
}

/// Response containing a list of devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceDto>,
}

/// A session notification.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDto {
    Status { message: String },
    Error { message: String },
    Terminate { reason: String },
}

impl From<SessionEvent> for EventDto {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Status(message) => EventDto::Status { message },
            SessionEvent::Error(message) => EventDto::Error { message },
            SessionEvent::Terminate { reason } => EventDto::Terminate { reason },
        }
    }
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the engine. Actually points to a SwitcherEngine struct.
pub type SwitcherEngineHandle = *mut c_void;

type EngineSession = Session<ControllerClient, Box<dyn StateStore + Send>>;

/// Internal engine state.
struct SwitcherEngine {
    session: Mutex<EngineSession>,
    cancel: CancelFlag,
    events: EventLog,
}

impl SwitcherEngine {
    fn new(config: &AppConfig) -> Result<Self, FfiError> {
        let store: Box<dyn StateStore + Send> = match &config.state.file {
            Some(path) => Box::new(FileStateStore::new(path)),
            None => store::default_store().map_err(|e| (ErrorCode::StoreError, e.to_string()))?,
        };

        let client = ControllerClient::from_config(&config.controller);
        let cancel = client.cancel_flag();
        let events = EventLog::new();
        let session = Session::open(
            client,
            store,
            Box::new(events.clone()),
            SessionOptions {
                write_through: config.state.write_through,
            },
        );

        Ok(Self {
            session: Mutex::new(session),
            cancel,
            events,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with switcher_engine_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    // Interior NULs cannot cross the boundary; drop them.
    CString::new(s.replace('\0', ""))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn engine_ref<'a>(handle: SwitcherEngineHandle) -> Result<&'a SwitcherEngine, FfiError> {
    (handle as *const SwitcherEngine)
        .as_ref()
        .ok_or((ErrorCode::InvalidHandle, "Invalid engine handle".to_string()))
}

/// Run `f` against the engine's session, failing fast if another call holds it.
fn with_session<T>(
    handle: SwitcherEngineHandle,
    f: impl FnOnce(&mut EngineSession) -> Result<T, SessionError>,
) -> Result<T, FfiError> {
    let engine = unsafe { engine_ref(handle)? };
    let mut session = match engine.session.try_lock() {
        Ok(session) => session,
        Err(TryLockError::WouldBlock) => {
            return Err((ErrorCode::Busy, "Another engine call is in progress".to_string()))
        }
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    f(&mut session).map_err(session_error)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, FfiError> {
    serde_json::to_string(value).map_err(|e| (ErrorCode::JsonError, e.to_string()))
}

/// Entry point wrapper for calls returning a status code.
fn code_call<F>(what: &str, f: F) -> i32
where
    F: FnOnce() -> Result<i32, FfiError> + UnwindSafe,
{
    clear_last_error();

    match panic::catch_unwind(f) {
        Ok(Ok(code)) => code,
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {}", what));
            ErrorCode::Panic as i32
        }
    }
}

/// Entry point wrapper for calls returning an allocated string.
fn string_call<F>(what: &str, f: F) -> *mut c_char
where
    F: FnOnce() -> Result<String, FfiError> + UnwindSafe,
{
    clear_last_error();

    match panic::catch_unwind(f) {
        Ok(Ok(s)) => alloc_c_string(&s),
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {}", what));
            ptr::null_mut()
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // The host may have installed a subscriber already.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new engine instance.
///
/// # Arguments
/// * `config_json` - JSON configuration with the same shape as the TOML
///   config file (can be null to read the per-user config file)
///
/// # Returns
/// Handle to the engine, or null on failure. Check switcher_engine_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with switcher_engine_destroy().
#[no_mangle]
pub extern "C" fn switcher_engine_create(config_json: *const c_char) -> SwitcherEngineHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<SwitcherEngineHandle, FfiError> {
        let config = if config_json.is_null() {
            AppConfig::load().map_err(|e| (ErrorCode::ConfigError, e.to_string()))?
        } else {
            let json = unsafe { parse_c_str(config_json) }.ok_or((
                ErrorCode::InvalidArgument,
                "Config is not valid UTF-8".to_string(),
            ))?;
            serde_json::from_str(json).map_err(|e| (ErrorCode::JsonError, e.to_string()))?
        };

        init_logging(&config.log_level);
        let engine = Box::new(SwitcherEngine::new(&config)?);
        info!("Engine created");
        Ok(Box::into_raw(engine) as SwitcherEngineHandle)
    });

    match result {
        Ok(Ok(handle)) => handle,
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy an engine instance, saving state first.
///
/// # Safety
/// The handle must have been created by switcher_engine_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn switcher_engine_destroy(handle: SwitcherEngineHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        let engine = unsafe { Box::from_raw(handle as *mut SwitcherEngine) };
        engine.cancel.cancel();
        let mut session = match engine.session.into_inner() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !session.is_terminated() {
            if let Err(e) = session.shutdown() {
                warn!("Failed to save state on destroy: {}", e);
            }
        }
    });
}

// ============================================================================
// FFI Functions - Device Operations
// ============================================================================

/// Get all devices with their rotation membership.
///
/// # Returns
/// JSON string `{"devices":[{"id":..,"name":..,"active":..,"enabled":..}]}`.
/// Caller must free with switcher_engine_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_list_devices(handle: SwitcherEngineHandle) -> *mut c_char {
    string_call("list devices", || {
        let entries = with_session(handle, |session| session.try_device_list())?;
        to_json(&DeviceListResponse {
            devices: entries.into_iter().map(Into::into).collect(),
        })
    })
}

/// Switch to the next enabled device.
///
/// # Returns
/// JSON of the activated device. Caller must free with switcher_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_cycle_next(handle: SwitcherEngineHandle) -> *mut c_char {
    string_call("cycle", || {
        let device = with_session(handle, |session| session.cycle_to_next())?;
        to_json(&device)
    })
}

/// Switch to a specific device.
///
/// # Returns
/// JSON of the activated device. Caller must free with switcher_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_select_device(
    handle: SwitcherEngineHandle,
    device_id: i32,
) -> *mut c_char {
    string_call("select device", || {
        let device = with_session(handle, |session| session.select_device(device_id.into()))?;
        to_json(&device)
    })
}

/// Flip rotation membership of a device.
///
/// # Returns
/// 1 if the device is now enabled, 0 if disabled, negative error code on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_toggle_enabled(
    handle: SwitcherEngineHandle,
    device_id: i32,
) -> i32 {
    code_call("toggle enabled", || {
        let enabled =
            with_session(handle, |session| session.toggle_enabled(device_id.into()))?;
        Ok(enabled as i32)
    })
}

/// Pin the controller executable currently on disk as trusted.
///
/// # Returns
/// The hex digest. Caller must free with switcher_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_record_trust(handle: SwitcherEngineHandle) -> *mut c_char {
    string_call("record trust", || {
        with_session(handle, |session| session.record_controller_trust())
    })
}

/// Save state and end the session. Later calls fail with Terminated.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_shutdown(handle: SwitcherEngineHandle) -> i32 {
    code_call("shutdown", || {
        with_session(handle, |session| session.shutdown())?;
        Ok(ErrorCode::Success as i32)
    })
}

/// Abort the controller call currently in flight, if any.
///
/// Safe to call from any thread while another call is running.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_cancel(handle: SwitcherEngineHandle) -> i32 {
    code_call("cancel", || {
        let engine = unsafe { engine_ref(handle)? };
        engine.cancel.cancel();
        Ok(ErrorCode::Success as i32)
    })
}

/// Drain session notifications collected since the last poll.
///
/// # Returns
/// JSON array of `{"kind":"status"|"error"|"terminate", ...}` objects.
/// Caller must free with switcher_engine_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn switcher_engine_poll_events(handle: SwitcherEngineHandle) -> *mut c_char {
    string_call("poll events", || {
        let engine = unsafe { engine_ref(handle)? };
        let events: Vec<EventDto> = engine.events.drain().into_iter().map(Into::into).collect();
        to_json(&events)
    })
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the switcher_engine_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn switcher_engine_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn switcher_engine_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with switcher_engine_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn switcher_engine_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with switcher_engine_free_string().
#[no_mangle]
pub extern "C" fn switcher_engine_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use audio_switcher::{DeviceId, TrustFailure};
    use std::path::Path;
    use tempfile::TempDir;

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        switcher_engine_free_string(ptr);
        s
    }

    fn create_with_state(state_file: &Path) -> SwitcherEngineHandle {
        let config = serde_json::json!({
            "controller": { "path": "/nonexistent/EndPointController.exe" },
            "state": { "file": state_file },
            "log_level": "warn",
        });
        let json = CString::new(config.to_string()).unwrap();
        let handle = switcher_engine_create(json.as_ptr());
        assert!(!handle.is_null());
        handle
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&SessionError::NotListed(DeviceId(3))),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            ErrorCode::from(&SessionError::Controller(ControllerError::Untrusted(
                TrustFailure::Missing
            ))),
            ErrorCode::Untrusted
        );
        assert_eq!(
            ErrorCode::from(&SessionError::Terminated),
            ErrorCode::Terminated
        );
    }

    #[test]
    fn test_engine_lifecycle() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");

        let handle = create_with_state(&state_file);
        switcher_engine_destroy(handle);

        assert!(state_file.exists());
    }

    #[test]
    fn test_toggle_persists_through_handle() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let handle = create_with_state(&state_file);

        assert_eq!(switcher_engine_toggle_enabled(handle, 4), 1);
        assert_eq!(switcher_engine_toggle_enabled(handle, 7), 1);
        assert_eq!(switcher_engine_toggle_enabled(handle, 4), 0);
        assert_eq!(switcher_engine_last_error_code(), 0);

        let saved = std::fs::read_to_string(&state_file).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved["enabled_devices"], serde_json::json!([7]));

        switcher_engine_destroy(handle);
    }

    #[test]
    fn test_untrusted_controller_terminates() {
        let dir = TempDir::new().unwrap();
        let handle = create_with_state(&dir.path().join("state.json"));

        assert!(switcher_engine_list_devices(handle).is_null());
        assert_eq!(switcher_engine_last_error_code(), ErrorCode::Untrusted as i32);
        let message = take_string(switcher_engine_last_error_message());
        assert!(message.contains("not trusted"));

        let events: Vec<EventDto> =
            serde_json::from_str(&take_string(switcher_engine_poll_events(handle))).unwrap();
        assert!(matches!(events.last(), Some(EventDto::Terminate { .. })));

        assert!(switcher_engine_cycle_next(handle).is_null());
        assert_eq!(switcher_engine_last_error_code(), ErrorCode::Terminated as i32);

        switcher_engine_destroy(handle);
    }

    #[test]
    fn test_overlapping_call_is_busy() {
        let dir = TempDir::new().unwrap();
        let handle = create_with_state(&dir.path().join("state.json"));

        {
            let engine = unsafe { engine_ref(handle).unwrap() };
            let _held = engine.session.lock().unwrap();
            assert_eq!(switcher_engine_toggle_enabled(handle, 1), ErrorCode::Busy as i32);
            // Cancel does not need the session.
            assert_eq!(switcher_engine_cancel(handle), 0);
        }

        assert_eq!(switcher_engine_toggle_enabled(handle, 1), 1);
        switcher_engine_destroy(handle);
    }

    #[test]
    fn test_invalid_handle() {
        assert_eq!(
            switcher_engine_shutdown(ptr::null_mut()),
            ErrorCode::InvalidHandle as i32
        );
        assert!(switcher_engine_poll_events(ptr::null_mut()).is_null());
        assert_eq!(
            switcher_engine_last_error_code(),
            ErrorCode::InvalidHandle as i32
        );
    }

    #[test]
    fn test_bad_config_json() {
        let json = CString::new("{ not json").unwrap();
        assert!(switcher_engine_create(json.as_ptr()).is_null());
        assert_eq!(switcher_engine_last_error_code(), ErrorCode::JsonError as i32);
    }

    #[test]
    fn test_version() {
        let version = take_string(switcher_engine_version());
        assert!(!version.is_empty());
    }
}
