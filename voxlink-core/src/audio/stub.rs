//! `StubBackend`: scripted in-memory backend with no sound hardware.
//!
//! Holds the callbacks the pipeline hands to `open` so a caller can play the
//! role of the OS audio threads: [`StubBackend::deliver_capture`] simulates a
//! microphone buffer and [`StubBackend::pull_playback`] simulates the output
//! device asking for bytes. Every interaction is counted so tests can assert
//! on exactly what the pipeline asked the platform to do.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::audio::device::{DeviceId, DeviceState};
use crate::audio::{
    AudioBackend, CaptureBuffer, CaptureCallback, DeviceStateCallback, DeviceWatch, OpenRequest,
    PlaybackCallback, StreamHandle,
};
use crate::error::{Result, VoxlinkError};

#[derive(Default)]
struct StubState {
    device_names: Vec<String>,
    open_error: Option<String>,
    start_failures_remaining: usize,
    stop_error: Option<String>,

    open_calls: usize,
    start_attempts: usize,
    stop_calls: usize,
    watch_registrations: usize,
    playing: bool,
    /// Bumped on every open and stop so in-flight callbacks are not
    /// reinstalled into a session that has since been torn down.
    generation: u64,
    last_request: Option<OpenRequest>,

    capture: Option<CaptureCallback>,
    playback: Option<PlaybackCallback>,
    watcher: Option<DeviceStateCallback>,
}

/// Cheaply cloneable; all clones share the same scripted state.
#[derive(Clone, Default)]
pub struct StubBackend {
    inner: Arc<Mutex<StubState>>,
}

impl StubBackend {
    /// A backend exposing `names` as the available devices.
    pub fn with_devices<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        backend.inner.lock().device_names = names.into_iter().map(Into::into).collect();
        backend
    }

    /// Make the next `open` calls fail with `reason`.
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.inner.lock().open_error = Some(reason.into());
    }

    /// Make the next `count` playback starts fail.
    pub fn fail_next_starts(&self, count: usize) {
        self.inner.lock().start_failures_remaining = count;
    }

    /// Make `stop` report an error (resources are still released).
    pub fn fail_stop(&self, reason: impl Into<String>) {
        self.inner.lock().stop_error = Some(reason.into());
    }

    pub fn open_calls(&self) -> usize {
        self.inner.lock().open_calls
    }

    pub fn start_attempts(&self) -> usize {
        self.inner.lock().start_attempts
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.lock().stop_calls
    }

    pub fn watch_registrations(&self) -> usize {
        self.inner.lock().watch_registrations
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    /// Whether streams are currently open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().capture.is_some()
    }

    pub fn is_watching(&self) -> bool {
        self.inner.lock().watcher.is_some()
    }

    pub fn last_request(&self) -> Option<OpenRequest> {
        self.inner.lock().last_request.clone()
    }

    /// Simulate one capture buffer. Returns `false` when no stream is open.
    pub fn deliver_capture(&self, samples: &[i16]) -> bool {
        self.with_capture(|capture| capture(CaptureBuffer::Pcm16(samples)))
    }

    /// Simulate one capture buffer of raw little-endian bytes.
    pub fn deliver_capture_bytes(&self, bytes: &[u8]) -> bool {
        self.with_capture(|capture| capture(CaptureBuffer::Bytes(bytes)))
    }

    /// Simulate the output device requesting `len` bytes.
    ///
    /// Returns `None` when no stream is open or playback has not been
    /// started; a paused device never pulls.
    pub fn pull_playback(&self, len: usize) -> Option<(usize, Vec<u8>)> {
        let (mut playback, generation) = {
            let mut state = self.inner.lock();
            if !state.playing {
                return None;
            }
            (state.playback.take()?, state.generation)
        };
        let mut out = vec![0u8; len];
        let written = playback(&mut out[..]);

        let mut state = self.inner.lock();
        if state.generation == generation {
            state.playback = Some(playback);
        }
        Some((written, out))
    }

    /// Simulate a platform device-state notification.
    pub fn notify_device_state(&self, device_state: DeviceState) -> bool {
        let watcher = self.inner.lock().watcher.clone();
        match watcher {
            Some(watcher) => {
                watcher(device_state);
                true
            }
            None => false,
        }
    }

    // Callbacks are taken out of the lock while they run so a callback can
    // never deadlock against the stub's own bookkeeping.
    fn with_capture<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut CaptureCallback),
    {
        let (mut capture, generation) = {
            let mut state = self.inner.lock();
            let Some(capture) = state.capture.take() else {
                return false;
            };
            (capture, state.generation)
        };
        f(&mut capture);

        let mut state = self.inner.lock();
        if state.generation == generation {
            state.capture = Some(capture);
        }
        true
    }
}

impl AudioBackend for StubBackend {
    fn device_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().device_names.clone())
    }

    fn open(
        &self,
        request: &OpenRequest,
        capture: CaptureCallback,
        playback: PlaybackCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        let mut state = self.inner.lock();
        state.open_calls += 1;
        if let Some(reason) = state.open_error.clone() {
            return Err(VoxlinkError::AudioStream(reason));
        }
        debug!(device = %request.device.name, "stub streams opened");
        state.generation += 1;
        state.last_request = Some(request.clone());
        state.capture = Some(capture);
        state.playback = Some(playback);
        state.playing = false;
        Ok(Box::new(StubStream {
            inner: Arc::clone(&self.inner),
            stopped: false,
        }))
    }

    fn watch_device(
        &self,
        _device: &DeviceId,
        _poll_interval: Duration,
        on_change: DeviceStateCallback,
    ) -> Result<Box<dyn DeviceWatch>> {
        let mut state = self.inner.lock();
        state.watch_registrations += 1;
        state.watcher = Some(on_change);
        Ok(Box::new(StubWatch {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct StubStream {
    inner: Arc<Mutex<StubState>>,
    stopped: bool,
}

impl StreamHandle for StubStream {
    fn start_playback(&mut self) -> Result<()> {
        let mut state = self.inner.lock();
        state.start_attempts += 1;
        if state.start_failures_remaining > 0 {
            state.start_failures_remaining -= 1;
            return Err(VoxlinkError::PlaybackStart("stub: device busy".into()));
        }
        state.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut state = self.inner.lock();
        state.stop_calls += 1;
        state.generation += 1;
        state.capture = None;
        state.playback = None;
        state.playing = false;
        match state.stop_error.take() {
            Some(reason) => Err(VoxlinkError::Stop(reason)),
            None => Ok(()),
        }
    }
}

struct StubWatch {
    inner: Arc<Mutex<StubState>>,
}

impl DeviceWatch for StubWatch {
    fn unregister(&mut self) {
        self.inner.lock().watcher = None;
    }
}
