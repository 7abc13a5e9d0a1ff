//! `AudioPipeline`: top-level session controller.
//!
//! ## Lifecycle
//!
//! ```text
//! AudioPipeline::new()
//!     └─► start(rate, device)   Idle → Starting → Running
//!         │                     capture flowing, playback paused
//!         ├─► play_samples()    queue + warm-up; output starts after N+1 frames
//!         └─► stop()            Running → Stopping → Idle
//! ```
//!
//! `start()` fails with `AlreadyStarted` while a session exists and touches no
//! hardware when the sample rate is invalid. `stop()` is idempotent and always
//! ends in `Idle`, even when the backend reports a stop error.
//!
//! ## Threading
//!
//! Session start/stop is expected from one controlling thread. `play_samples`
//! may be called from any thread concurrently with the hardware callbacks.
//! All fields use interior mutability so the pipeline can sit in an `Arc`.

pub mod session;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        device::{resolve_device, DeviceId, DeviceState},
        format::{is_supported_rate, PcmFormat, DEFAULT_WARMUP_BUFFERS, FRAME_DURATION},
        AudioBackend, DeviceStateCallback, OpenRequest,
    },
    buffering::{CapturedFrame, PlaybackWarmupGate, SampleQueue, WarmupOutcome},
    error::{Result, VoxlinkError},
    ipc::events::{DeviceStateEvent, SessionState, SessionStatusEvent},
};

use self::session::{ActiveSession, DiagnosticsSnapshot, SessionDiagnostics};

/// Broadcast channel capacity for status and device events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `AudioPipeline`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capture frame quantum. Default: 20 ms.
    pub frame_duration: Duration,
    /// Playback frames queued before the output device is started. Also the
    /// number of hardware buffers requested per direction. Default: 5.
    pub warmup_buffers: usize,
    /// Duration of one hardware buffer. Default: 20 ms.
    pub buffer_duration: Duration,
    /// Completed capture frames held for a slow consumer before new frames
    /// are dropped. Default: 256 (≈ 5 s).
    pub frame_channel_capacity: usize,
    /// How often backends without push notifications re-check device
    /// presence. Default: 1 s.
    pub device_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_duration: FRAME_DURATION,
            warmup_buffers: DEFAULT_WARMUP_BUFFERS,
            buffer_duration: FRAME_DURATION,
            frame_channel_capacity: 256,
            device_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Result of a start request, for hosts that want a flat status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioStatus {
    Success,
    AlreadyStarted,
    InvalidSampleRate,
    AudioDeviceNameNotFound,
    NoAudioDevicesFound,
    /// The device was found but its streams could not be opened.
    DeviceError,
}

impl AudioStatus {
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => AudioStatus::Success,
            Err(VoxlinkError::AlreadyStarted) => AudioStatus::AlreadyStarted,
            Err(VoxlinkError::InvalidSampleRate(_)) => AudioStatus::InvalidSampleRate,
            Err(VoxlinkError::DeviceNotFound { .. }) => AudioStatus::AudioDeviceNameNotFound,
            Err(VoxlinkError::NoDevicesAvailable) => AudioStatus::NoAudioDevicesFound,
            Err(_) => AudioStatus::DeviceError,
        }
    }

    pub fn is_success(self) -> bool {
        self == AudioStatus::Success
    }
}

/// The top-level pipeline handle.
///
/// `AudioPipeline` is `Send + Sync`. Wrap in `Arc<AudioPipeline>` to share
/// between the controlling thread and the thread feeding playback.
pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    config: PipelineConfig,
    /// The live session, if any. Taken out before teardown so no caller can
    /// reach a half-released session.
    session: Mutex<Option<ActiveSession>>,
    /// Canonical lifecycle state.
    state: Mutex<SessionState>,
    frame_tx: Sender<CapturedFrame>,
    frame_rx: Receiver<CapturedFrame>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    device_tx: broadcast::Sender<DeviceStateEvent>,
    device_seq: Arc<AtomicU64>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl AudioPipeline {
    /// Create an idle pipeline. No hardware is touched until `start()`.
    pub fn new<B: AudioBackend>(backend: B, config: PipelineConfig) -> Self {
        Self::with_shared_backend(Arc::new(backend), config)
    }

    pub fn with_shared_backend(backend: Arc<dyn AudioBackend>, config: PipelineConfig) -> Self {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(config.frame_channel_capacity.max(1));
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (device_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            backend,
            config,
            session: Mutex::new(None),
            state: Mutex::new(SessionState::Idle),
            frame_tx,
            frame_rx,
            status_tx,
            device_tx,
            device_seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start capture and acquire playback for a session.
    ///
    /// `device_name` of `None` selects the first enumerated device.
    ///
    /// # Errors
    /// - `VoxlinkError::AlreadyStarted` if a session is active.
    /// - `VoxlinkError::InvalidSampleRate` unless `sample_rate` is 8000 or 16000.
    /// - `VoxlinkError::DeviceNotFound` / `VoxlinkError::NoDevicesAvailable` on resolution failure.
    /// - `VoxlinkError::AudioStream` / `VoxlinkError::AudioDevice` if the backend cannot open streams.
    pub fn start(&self, sample_rate: u32, device_name: Option<&str>) -> Result<()> {
        let mut slot = self.session.lock();
        if slot.is_some() || *self.state.lock() != SessionState::Idle {
            return Err(VoxlinkError::AlreadyStarted);
        }
        if !is_supported_rate(sample_rate) {
            return Err(VoxlinkError::InvalidSampleRate(sample_rate));
        }

        self.set_state(SessionState::Starting, None);
        match self.open_session(sample_rate, device_name) {
            Ok(session) => {
                info!(
                    device = session.device.name.as_str(),
                    sample_rate,
                    warmup_buffers = self.config.warmup_buffers,
                    "audio session started"
                );
                *slot = Some(session);
                self.set_state(SessionState::Running, None);
                Ok(())
            }
            Err(e) => {
                warn!("audio session failed to start: {e}");
                self.set_state(SessionState::Idle, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// `start` flattened to a status code.
    pub fn start_audio(&self, sample_rate: u32, device_name: Option<&str>) -> AudioStatus {
        AudioStatus::from_result(&self.start(sample_rate, device_name))
    }

    /// Stop the session and release all hardware. No-op when idle.
    ///
    /// Backend stop failures are logged; the pipeline always returns to `Idle`.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            debug!("stop requested with no active session");
            return;
        };

        self.set_state(SessionState::Stopping, None);
        let device = session.device.name.clone();
        session.shutdown();
        self.set_state(SessionState::Idle, None);
        info!(device = device.as_str(), "audio session stopped");
    }

    /// `stop` for hosts using the status-code surface. Always succeeds.
    pub fn stop_audio(&self) -> AudioStatus {
        self.stop();
        AudioStatus::Success
    }

    /// Queue samples for playback.
    ///
    /// Each call is one playback frame for warm-up accounting. Returns `false`
    /// (and drops the samples) when no session is running or `samples` is empty.
    pub fn play_samples(&self, samples: &[i16]) -> bool {
        self.feed(samples).is_some()
    }

    /// Like `play_samples`, but reports what the warm-up gate did.
    pub fn feed(&self, samples: &[i16]) -> Option<WarmupOutcome> {
        if samples.is_empty() {
            return None;
        }
        let mut slot = self.session.lock();
        let session = slot.as_mut()?;
        Some(session.feed(samples, &self.diagnostics))
    }

    /// Current lifecycle state (snapshot).
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Sample rate of the running session.
    pub fn sample_rate(&self) -> Option<u32> {
        self.session.lock().as_ref().map(|s| s.format.sample_rate)
    }

    /// Device of the running session.
    pub fn device(&self) -> Option<DeviceId> {
        self.session.lock().as_ref().map(|s| s.device.clone())
    }

    /// Receiver for completed capture frames.
    ///
    /// All clones share one queue: each frame goes to exactly one receiver.
    pub fn frames(&self) -> Receiver<CapturedFrame> {
        self.frame_rx.clone()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to connect/disconnect notifications for the session device.
    pub fn subscribe_device_state(&self) -> broadcast::Receiver<DeviceStateEvent> {
        self.device_tx.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        match self.session.lock().as_ref() {
            Some(session) => session.snapshot(&self.diagnostics),
            None => session::counters(&self.diagnostics),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn open_session(&self, sample_rate: u32, device_name: Option<&str>) -> Result<ActiveSession> {
        let names = self.backend.device_names()?;
        let device = resolve_device(&names, device_name)?;
        let format = PcmFormat::mono16(sample_rate);
        let frame_samples = format.samples_per_quantum(self.config.frame_duration);
        if frame_samples == 0 {
            return Err(VoxlinkError::Other(anyhow::anyhow!(
                "frame duration {:?} holds no samples at {sample_rate} Hz",
                self.config.frame_duration
            )));
        }

        // Frames left over from a previous session belong to nobody.
        let stale = self.frame_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded capture frames from previous session");
        }
        self.diagnostics.reset();

        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let queue = Arc::new(SampleQueue::new());

        let capture = session::capture_callback(
            format,
            frame_samples,
            self.frame_tx.clone(),
            Arc::clone(&running),
            Arc::clone(&self.diagnostics),
        );
        let playback = session::playback_callback(
            Arc::clone(&queue),
            Arc::clone(&running),
            Arc::clone(&self.diagnostics),
        );

        let request = OpenRequest {
            device: device.clone(),
            format,
            buffer_duration: self.config.buffer_duration,
            buffer_count: self.config.warmup_buffers,
        };
        debug!(?request, frame_samples, "opening session streams");
        let stream = self.backend.open(&request, capture, playback)?;

        let watch = match self.backend.watch_device(
            &device,
            self.config.device_poll_interval,
            self.device_notifier(&device),
        ) {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!("device change monitoring unavailable: {e}");
                None
            }
        };

        Ok(ActiveSession {
            device,
            format,
            queue,
            gate: PlaybackWarmupGate::new(self.config.warmup_buffers),
            running,
            stream,
            watch,
        })
    }

    fn device_notifier(&self, device: &DeviceId) -> DeviceStateCallback {
        let tx = self.device_tx.clone();
        let seq = Arc::clone(&self.device_seq);
        let name = device.name.clone();
        Arc::new(move |state: DeviceState| {
            let connected = state.is_connected();
            if connected {
                info!(device = name.as_str(), "audio device connected");
            } else {
                warn!(device = name.as_str(), "audio device disconnected");
            }
            let _ = tx.send(DeviceStateEvent {
                seq: seq.fetch_add(1, Ordering::Relaxed),
                connected,
                device: name.clone(),
            });
        })
    }

    fn set_state(&self, new_state: SessionState, detail: Option<String>) {
        *self.state.lock() = new_state;
        let _ = self.status_tx.send(SessionStatusEvent {
            state: new_state,
            detail,
        });
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
