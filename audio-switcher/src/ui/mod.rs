//! UI module for the Windows tray host.

pub mod icons;
pub mod tray;

pub use tray::{TrayAction, TrayError, TrayManager};
