//! Line protocol spoken by the controller executable.
//!
//! Enumeration output is one record per line, fields separated by `|`:
//!
//! ```text
//! <id>|<name>|<ignored>|<1 if default, else 0>
//! ```

use super::device::{Device, DeviceId};
use std::collections::HashSet;
use thiserror::Error;

/// Field separator within a record.
pub const FIELD_SEPARATOR: char = '|';

/// Format string handed to the controller so it emits the record layout above.
pub const LIST_FORMAT: &str = "%d|%ws|%d|%d";

const MIN_FIELDS: usize = 4;

/// A controller output line that does not follow the record layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ProtocolViolation {
    /// 1-based line number within the output
    pub line: usize,
    pub reason: String,
}

impl ProtocolViolation {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Parse a single record.
pub fn parse_record(line_number: usize, line: &str) -> Result<Device, ProtocolViolation> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < MIN_FIELDS {
        return Err(ProtocolViolation::new(
            line_number,
            format!("expected {} fields, found {}", MIN_FIELDS, fields.len()),
        ));
    }

    let id: DeviceId = fields[0].parse().map_err(|_| {
        ProtocolViolation::new(line_number, format!("invalid device id {:?}", fields[0]))
    })?;

    Ok(Device {
        id,
        name: fields[1].to_string(),
        active: fields[3].trim() == "1",
    })
}

/// Parse the full enumeration output.
///
/// Any malformed line fails the whole listing; a partial list would hide a
/// broken controller contract behind a plausible-looking menu.
pub fn parse_device_list(output: &str) -> Result<Vec<Device>, ProtocolViolation> {
    let mut devices = Vec::new();
    let mut seen = HashSet::new();

    for (index, raw) in output.trim_end().split('\n').enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        let device = parse_record(index + 1, line)?;
        if !seen.insert(device.id) {
            return Err(ProtocolViolation::new(
                index + 1,
                format!("duplicate device id {}", device.id),
            ));
        }
        devices.push(device);
    }

    Ok(devices)
}

/// Decode raw controller stdout and parse it.
pub fn parse_device_list_bytes(output: &[u8]) -> Result<Vec<Device>, ProtocolViolation> {
    let text = std::str::from_utf8(output).map_err(|e| {
        let line = output[..e.valid_up_to()]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1;
        ProtocolViolation::new(line, "output is not valid UTF-8")
    })?;
    parse_device_list(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_devices_in_order() {
        let devices = parse_device_list("3|Speakers|0|1\n5|Headphones|0|0").unwrap();
        assert_eq!(
            devices,
            vec![
                Device::new(3, "Speakers", true),
                Device::new(5, "Headphones", false),
            ]
        );
    }

    #[test]
    fn test_non_integer_id_fails_whole_listing() {
        let err = parse_device_list("3|Speakers|0|1\nabc|X|0|1").unwrap_err();
        assert_eq!(err.line, 2);

        assert!(parse_device_list("abc|X|0|1").is_err());
    }

    #[test]
    fn test_too_few_fields() {
        let err = parse_device_list("3|Speakers|0").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("expected 4 fields"));
    }

    #[test]
    fn test_crlf_and_trailing_whitespace() {
        let devices = parse_device_list("1|Monitor|0|0\r\n2|USB DAC|0|1\r\n\r\n  ").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1], Device::new(2, "USB DAC", true));
    }

    #[test]
    fn test_active_flag_only_exact_one() {
        let devices = parse_device_list("1|A|0|true\n2|B|0|2\n3|C|0| 1").unwrap();
        assert!(!devices[0].active);
        assert!(!devices[1].active);
        assert!(devices[2].active);
    }

    #[test]
    fn test_extra_fields_and_unicode_names() {
        let devices = parse_device_list("7|Kopfhörer – Bluetooth 🎧|x|1|extra").unwrap();
        assert_eq!(devices[0].name, "Kopfhörer – Bluetooth 🎧");
        assert!(devices[0].active);
    }

    #[test]
    fn test_empty_output_is_empty_list() {
        assert!(parse_device_list("").unwrap().is_empty());
        assert!(parse_device_list("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_is_violation() {
        let err = parse_device_list("1|A|0|0\n1|B|0|1").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_invalid_utf8_is_violation() {
        let err = parse_device_list_bytes(b"1|A|0|0\n2|\xff|0|1").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
