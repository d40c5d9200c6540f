//! Windows Registry state store.
//!
//! Persists session state under `HKCU\Software\AudioSwitcher`:
//!
//! - `EnabledDevices` (REG_SZ): comma-separated ids in rotation order
//! - `LastDevice` (REG_SZ): decimal id, absent when nothing was selected
//! - `ControllerDigest` (REG_SZ): pinned controller digest

use crate::controller::DeviceId;
use crate::store::{PersistedState, StateStore, StoreError};
use windows::core::PCWSTR;
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
    HKEY, HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_CREATE_KEY_DISPOSITION,
    REG_OPTION_NON_VOLATILE, REG_SZ, REG_VALUE_TYPE,
};

/// Registry-based state store.
pub struct RegistryStateStore {
    app_key_path: Vec<u16>,
}

impl RegistryStateStore {
    const APP_KEY: &'static str = r"Software\AudioSwitcher";
    const ENABLED_VALUE: &'static str = "EnabledDevices";
    const LAST_DEVICE_VALUE: &'static str = "LastDevice";
    const DIGEST_VALUE: &'static str = "ControllerDigest";

    pub fn new() -> Self {
        Self {
            app_key_path: to_wide(Self::APP_KEY),
        }
    }

    fn open(&self, write: bool) -> Option<RegKey> {
        unsafe {
            let mut hkey = HKEY::default();
            let result = if write {
                let mut disposition = REG_CREATE_KEY_DISPOSITION::default();
                RegCreateKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR::from_raw(self.app_key_path.as_ptr()),
                    0,
                    PCWSTR::null(),
                    REG_OPTION_NON_VOLATILE,
                    KEY_WRITE,
                    None,
                    &mut hkey,
                    Some(&mut disposition),
                )
            } else {
                RegOpenKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR::from_raw(self.app_key_path.as_ptr()),
                    0,
                    KEY_READ,
                    &mut hkey,
                )
            };

            if result.is_err() {
                None
            } else {
                Some(RegKey(hkey))
            }
        }
    }
}

impl Default for RegistryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for RegistryStateStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        let Some(key) = self.open(false) else {
            return Ok(PersistedState::default());
        };

        let enabled_devices = match key.read_string(Self::ENABLED_VALUE) {
            Some(raw) => parse_id_list(&raw)?,
            None => Vec::new(),
        };
        let last_device = match key.read_string(Self::LAST_DEVICE_VALUE) {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<DeviceId>()
                    .map_err(|_| StoreError::Corrupt(format!("invalid last device {:?}", raw)))?,
            ),
            _ => None,
        };
        let controller_digest = key.read_string(Self::DIGEST_VALUE).unwrap_or_default();

        Ok(PersistedState {
            enabled_devices,
            last_device,
            controller_digest,
        })
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let key = self
            .open(true)
            .ok_or_else(|| StoreError::Registry(format!("failed to create {}", Self::APP_KEY)))?;

        key.write_string(Self::ENABLED_VALUE, &format_id_list(&state.enabled_devices))?;
        match state.last_device {
            Some(id) => key.write_string(Self::LAST_DEVICE_VALUE, &id.to_string())?,
            None => key.delete_value(Self::LAST_DEVICE_VALUE),
        }
        key.write_string(Self::DIGEST_VALUE, &state.controller_digest)?;
        Ok(())
    }
}

/// Open registry key, closed on drop.
struct RegKey(HKEY);

impl RegKey {
    fn read_string(&self, name: &str) -> Option<String> {
        let value_name = to_wide(name);
        unsafe {
            let mut value_type = REG_VALUE_TYPE::default();
            let mut data_size = 0u32;
            let result = RegQueryValueExW(
                self.0,
                PCWSTR::from_raw(value_name.as_ptr()),
                None,
                Some(&mut value_type),
                None,
                Some(&mut data_size),
            );
            if result.is_err() || value_type != REG_SZ {
                return None;
            }

            let mut buf = vec![0u16; (data_size as usize).div_ceil(2)];
            let result = RegQueryValueExW(
                self.0,
                PCWSTR::from_raw(value_name.as_ptr()),
                None,
                None,
                Some(buf.as_mut_ptr() as *mut u8),
                Some(&mut data_size),
            );
            if result.is_err() {
                return None;
            }

            let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
            Some(String::from_utf16_lossy(&buf[..len]))
        }
    }

    fn write_string(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let value_name = to_wide(name);
        let data = to_wide(value);
        unsafe {
            let result = RegSetValueExW(
                self.0,
                PCWSTR::from_raw(value_name.as_ptr()),
                0,
                REG_SZ,
                Some(std::slice::from_raw_parts(
                    data.as_ptr() as *const u8,
                    data.len() * 2,
                )),
            );
            if result.is_err() {
                return Err(StoreError::Registry(format!("failed to write {}", name)));
            }
        }
        Ok(())
    }

    fn delete_value(&self, name: &str) {
        let value_name = to_wide(name);
        unsafe {
            let _ = RegDeleteValueW(self.0, PCWSTR::from_raw(value_name.as_ptr()));
        }
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn format_id_list(ids: &[DeviceId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_id_list(raw: &str) -> Result<Vec<DeviceId>, StoreError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.parse::<DeviceId>()
                .map_err(|_| StoreError::Corrupt(format!("invalid device id {:?}", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list_format() {
        let ids = vec![DeviceId(5), DeviceId(3), DeviceId(9)];
        assert_eq!(format_id_list(&ids), "5,3,9");
        assert_eq!(parse_id_list("5,3,9").unwrap(), ids);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(parse_id_list("5,x").is_err());
    }
}
