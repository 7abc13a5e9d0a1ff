//! Event types broadcast to the application.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `AudioPipeline::subscribe_status` |
//! | `DeviceStateEvent` | `AudioPipeline::subscribe_device_state` |
//!
//! Captured frames are not events; they travel on the frame channel returned
//! by `AudioPipeline::frames`.

use serde::{Deserialize, Serialize};

use crate::audio::device::DeviceState;

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle state of the audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No hardware held.
    Idle,
    /// Validating configuration and acquiring devices.
    Starting,
    /// Capturing; playback may still be warming up.
    Running,
    /// Releasing devices.
    Stopping,
}

/// Emitted whenever the session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Optional human-readable detail (e.g. the error that aborted a start).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// Emitted when the session's audio device connects or disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// `true` when the device is present and usable.
    pub connected: bool,
    /// Name of the device the event refers to.
    pub device: String,
}

impl DeviceStateEvent {
    pub fn state(&self) -> DeviceState {
        if self.connected {
            DeviceState::Connected
        } else {
            DeviceState::Disconnected
        }
    }
}
