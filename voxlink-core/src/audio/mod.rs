//! Platform audio services.
//!
//! # Design constraints
//!
//! Capture and playback callbacks run on OS audio threads at elevated
//! priority. They **must not**:
//! - Block on anything except the playback queue's short critical section
//! - Perform I/O
//! - Allocate on the steady-state path
//!
//! The pipeline never talks to a sound API directly. It goes through
//! [`AudioBackend`], which enumerates devices, opens one capture and one
//! playback stream per session, and optionally watches the session device for
//! disconnects. [`host::CpalBackend`] is the real implementation;
//! [`stub::StubBackend`] drives the same callbacks from tests.

pub mod device;
pub mod format;
#[cfg(feature = "audio-cpal")]
pub mod host;
pub mod stub;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

use self::device::{DeviceId, DeviceState};
use self::format::PcmFormat;

/// One buffer handed over by the capture stream.
#[derive(Debug, Clone, Copy)]
pub enum CaptureBuffer<'a> {
    /// Typed mono 16-bit samples.
    Pcm16(&'a [i16]),
    /// Raw little-endian 16-bit PCM bytes.
    Bytes(&'a [u8]),
}

impl CaptureBuffer<'_> {
    pub fn sample_count(&self) -> usize {
        match self {
            CaptureBuffer::Pcm16(samples) => samples.len(),
            CaptureBuffer::Bytes(bytes) => bytes.len() / 2,
        }
    }
}

/// Invoked on the capture thread for every buffer the device delivers.
pub type CaptureCallback = Box<dyn for<'a> FnMut(CaptureBuffer<'a>) + Send + 'static>;

/// Invoked on the playback thread to fill an output buffer with
/// little-endian 16-bit PCM. Returns the number of bytes written.
pub type PlaybackCallback = Box<dyn FnMut(&mut [u8]) -> usize + Send + 'static>;

/// Invoked from the platform's notification context on device state changes.
pub type DeviceStateCallback = Arc<dyn Fn(DeviceState) + Send + Sync + 'static>;

/// Parameters for opening a session's capture and playback streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub device: DeviceId,
    pub format: PcmFormat,
    /// Duration of each hardware buffer.
    pub buffer_duration: Duration,
    /// Number of hardware buffers per direction.
    pub buffer_count: usize,
}

/// Injectable platform services used by the pipeline.
pub trait AudioBackend: Send + Sync + 'static {
    /// Names of available devices, in platform enumeration order.
    fn device_names(&self) -> Result<Vec<String>>;

    /// Acquire capture and playback resources for `request.device`.
    ///
    /// Capture starts immediately. Playback is acquired paused and only
    /// begins on [`StreamHandle::start_playback`].
    fn open(
        &self,
        request: &OpenRequest,
        capture: CaptureCallback,
        playback: PlaybackCallback,
    ) -> Result<Box<dyn StreamHandle>>;

    /// Observe connect/disconnect transitions for `device`.
    ///
    /// `poll_interval` is a hint for backends without push notifications.
    fn watch_device(
        &self,
        device: &DeviceId,
        poll_interval: Duration,
        on_change: DeviceStateCallback,
    ) -> Result<Box<dyn DeviceWatch>>;
}

/// Owning handle to an open capture + playback stream pair.
pub trait StreamHandle: Send {
    /// Begin pulling audio for output. Fallible on resource contention.
    fn start_playback(&mut self) -> Result<()>;

    /// Release both streams. Further calls are no-ops.
    fn stop(&mut self) -> Result<()>;
}

/// Registration for device-change notifications.
pub trait DeviceWatch: Send {
    /// Stop delivering notifications. Further calls are no-ops.
    fn unregister(&mut self);
}
