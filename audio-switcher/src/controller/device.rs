//! Audio device data models.
//!
//! Devices are rebuilt from controller output on every enumeration, so none
//! of these types carry state beyond what one listing reported.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier the controller assigns to an output device.
///
/// Only stable for the lifetime of one controller process; treat it as
/// opaque and re-validate it against a fresh listing before trusting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Decimal, locale-invariant: this is also the activation argument.
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i32>().map(DeviceId)
    }
}

impl From<i32> for DeviceId {
    fn from(value: i32) -> Self {
        DeviceId(value)
    }
}

/// An audio output device as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Controller-assigned id
    pub id: DeviceId,

    /// Human-readable device name (arbitrary UTF-8)
    pub name: String,

    /// Whether the controller reports this as the current system default
    pub active: bool,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>, active: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active,
        }
    }

    /// Label used for menu entries, e.g. `Speakers (3)`.
    pub fn menu_label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

/// A listed device joined with its rotation membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device: Device,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parse_and_display() {
        let id: DeviceId = " 42 ".parse().unwrap();
        assert_eq!(id, DeviceId(42));
        assert_eq!(id.to_string(), "42");
        assert_eq!(DeviceId(-7).to_string(), "-7");
        assert!("abc".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_menu_label() {
        let device = Device::new(5, "Lautsprecher (Realtek®)", false);
        assert_eq!(device.menu_label(), "Lautsprecher (Realtek®) (5)");
    }

    #[test]
    fn test_device_id_serializes_as_number() {
        let json = serde_json::to_string(&vec![DeviceId(5), DeviceId(3)]).unwrap();
        assert_eq!(json, "[5,3]");
    }
}
