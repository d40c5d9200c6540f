//! Platform-specific module.
//!
//! Windows keeps session state in the registry; other platforms use the
//! JSON file store.

#[cfg(windows)]
pub mod registry;

#[cfg(windows)]
pub use registry::RegistryStateStore;
