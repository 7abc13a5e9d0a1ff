//! Audio device enumeration and name resolution.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxlinkError};

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the platform's enumeration order.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// A device selected for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceId {
    pub index: usize,
    pub name: String,
}

/// Connection state reported by device-change monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Disconnected,
}

impl DeviceState {
    pub fn is_connected(self) -> bool {
        self == DeviceState::Connected
    }
}

/// Pick the session device from an enumerated name list.
///
/// A requested name must match exactly; the first match wins. With no
/// request (or an empty one) the first enumerated device is used.
///
/// # Errors
/// - `VoxlinkError::DeviceNotFound` if `requested` is not in `names`.
/// - `VoxlinkError::NoDevicesAvailable` if nothing was requested and `names` is empty.
pub fn resolve_device(names: &[String], requested: Option<&str>) -> Result<DeviceId> {
    match requested.filter(|name| !name.is_empty()) {
        Some(wanted) => names
            .iter()
            .position(|name| name == wanted)
            .map(|index| DeviceId {
                index,
                name: names[index].clone(),
            })
            .ok_or_else(|| VoxlinkError::DeviceNotFound {
                name: wanted.to_string(),
            }),
        None => names
            .first()
            .map(|name| DeviceId {
                index: 0,
                name: name.clone(),
            })
            .ok_or(VoxlinkError::NoDevicesAvailable),
    }
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", index + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    index,
                    name,
                    is_default,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn named_device_resolves_to_first_exact_match() {
        let devices = names(&["Built-in Mic", "USB Headset", "USB Headset"]);
        let id = resolve_device(&devices, Some("USB Headset")).expect("device resolves");
        assert_eq!(id.index, 1);
        assert_eq!(id.name, "USB Headset");
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let devices = names(&["USB Headset"]);
        let err = resolve_device(&devices, Some("usb headset")).unwrap_err();
        assert!(matches!(err, VoxlinkError::DeviceNotFound { name } if name == "usb headset"));
    }

    #[test]
    fn missing_name_picks_first_device() {
        let devices = names(&["Built-in Mic", "USB Headset"]);
        let id = resolve_device(&devices, None).expect("device resolves");
        assert_eq!(id.index, 0);
        assert_eq!(id.name, "Built-in Mic");

        let id = resolve_device(&devices, Some("")).expect("empty name behaves as unset");
        assert_eq!(id.index, 0);
    }

    #[test]
    fn no_devices_without_a_name_is_an_error() {
        let err = resolve_device(&[], None).unwrap_err();
        assert!(matches!(err, VoxlinkError::NoDevicesAvailable));
    }

    #[test]
    fn named_device_on_empty_system_is_not_found() {
        let err = resolve_device(&[], Some("USB Headset")).unwrap_err();
        assert!(matches!(err, VoxlinkError::DeviceNotFound { .. }));
    }

    #[test]
    fn device_state_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceState::Disconnected).expect("serialize state");
        assert_eq!(json, r#""disconnected""#);
    }
}
