//! Per-session state and the callbacks wired into the backend.
//!
//! ## Ownership
//!
//! ```text
//! capture thread ──► CaptureCallback (owns CaptureFramer) ──► frame channel
//! app thread ──► play_samples ──► SampleQueue ◄── PlaybackCallback ◄── playback thread
//!                     └──► PlaybackWarmupGate ──► StreamHandle::start_playback
//! ```
//!
//! The callbacks hold their own `Arc`s to the queue and the running flag, so
//! tearing down an `ActiveSession` while a callback is mid-flight only makes
//! that callback observe `running == false` on its next call.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    audio::{
        device::DeviceId, format::PcmFormat, CaptureBuffer, CaptureCallback, DeviceWatch,
        PlaybackCallback, StreamHandle,
    },
    buffering::{
        CaptureFramer, CapturedFrame, ChannelListener, PlaybackWarmupGate, SampleBlock,
        SampleQueue, WarmupOutcome,
    },
};

/// Counters shared between the facade and the real-time callbacks.
pub struct SessionDiagnostics {
    pub capture_buffers: AtomicUsize,
    pub frames_captured: AtomicU64,
    pub frames_dropped: Arc<AtomicU64>,
    pub frames_fed: AtomicU64,
    pub playback_start_failures: AtomicUsize,
    pub playback_reads: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            capture_buffers: AtomicUsize::new(0),
            frames_captured: AtomicU64::new(0),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            frames_fed: AtomicU64::new(0),
            playback_start_failures: AtomicUsize::new(0),
            playback_reads: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.capture_buffers.store(0, Ordering::Relaxed);
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_fed.store(0, Ordering::Relaxed);
        self.playback_start_failures.store(0, Ordering::Relaxed);
        self.playback_reads.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub capture_buffers: usize,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_fed: u64,
    pub playback_started: bool,
    pub playback_start_failures: usize,
    pub playback_reads: usize,
    pub playback_underruns: usize,
    pub playback_short_reads: usize,
    pub queued_bytes: usize,
}

/// Everything a running session owns. Dropped as a unit on stop.
pub struct ActiveSession {
    pub device: DeviceId,
    pub format: PcmFormat,
    pub queue: Arc<SampleQueue>,
    pub gate: PlaybackWarmupGate,
    pub running: Arc<AtomicBool>,
    pub stream: Box<dyn StreamHandle>,
    pub watch: Option<Box<dyn DeviceWatch>>,
}

impl ActiveSession {
    /// Queue one block of playback samples and advance the warm-up gate.
    pub fn feed(&mut self, samples: &[i16], diagnostics: &SessionDiagnostics) -> WarmupOutcome {
        self.queue.enqueue(SampleBlock::from_samples(samples));
        diagnostics.frames_fed.fetch_add(1, Ordering::Relaxed);

        let stream = &mut self.stream;
        let outcome = self.gate.on_frame(|| stream.start_playback());
        if outcome == WarmupOutcome::StartFailed {
            diagnostics
                .playback_start_failures
                .fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Release hardware and session state. Stop errors are logged, never returned.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut watch) = self.watch.take() {
            watch.unregister();
        }
        if let Err(e) = self.stream.stop() {
            warn!(device = %self.device.name, "error while stopping audio streams: {e}");
        }
        self.queue.clear();
        self.gate.reset();
        debug!(device = %self.device.name, "session resources released");
    }

    pub fn snapshot(&self, diagnostics: &SessionDiagnostics) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            playback_started: self.gate.is_open(),
            playback_underruns: self.queue.underruns(),
            playback_short_reads: self.queue.short_reads(),
            queued_bytes: self.queue.queued_bytes(),
            ..counters(diagnostics)
        }
    }
}

/// Counter-only snapshot, used while idle.
pub fn counters(diagnostics: &SessionDiagnostics) -> DiagnosticsSnapshot {
    DiagnosticsSnapshot {
        capture_buffers: diagnostics.capture_buffers.load(Ordering::Relaxed),
        frames_captured: diagnostics.frames_captured.load(Ordering::Relaxed),
        frames_dropped: diagnostics.frames_dropped.load(Ordering::Relaxed),
        frames_fed: diagnostics.frames_fed.load(Ordering::Relaxed),
        playback_start_failures: diagnostics.playback_start_failures.load(Ordering::Relaxed),
        playback_reads: diagnostics.playback_reads.load(Ordering::Relaxed),
        ..DiagnosticsSnapshot::default()
    }
}

/// Capture callback: frames every buffer and forwards completed frames
/// to `frame_tx` without blocking.
pub fn capture_callback(
    format: PcmFormat,
    frame_samples: usize,
    frame_tx: crossbeam_channel::Sender<CapturedFrame>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<SessionDiagnostics>,
) -> CaptureCallback {
    let listener = ChannelListener::new(frame_tx, Arc::clone(&diagnostics.frames_dropped));
    let mut framer = CaptureFramer::new(frame_samples, format.sample_rate, listener);

    Box::new(move |buffer: CaptureBuffer<'_>| {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        match buffer {
            CaptureBuffer::Pcm16(samples) => framer.push(samples),
            CaptureBuffer::Bytes(bytes) => framer.push_bytes(bytes),
        }
        diagnostics.capture_buffers.fetch_add(1, Ordering::Relaxed);
        diagnostics
            .frames_captured
            .store(framer.frames_emitted(), Ordering::Relaxed);
    })
}

/// Playback callback: pulls from the session queue.
///
/// Once the session stops, it answers with silence rather than touching a
/// queue that is being cleared.
pub fn playback_callback(
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<SessionDiagnostics>,
) -> PlaybackCallback {
    Box::new(move |out: &mut [u8]| {
        if !running.load(Ordering::Relaxed) {
            out.fill(0);
            return out.len();
        }
        diagnostics.playback_reads.fetch_add(1, Ordering::Relaxed);
        queue.read(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::bounded;

    #[test]
    fn capture_callback_frames_and_counts() {
        let (tx, rx) = bounded(8);
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut capture = capture_callback(
            PcmFormat::mono16(8_000),
            160,
            tx,
            Arc::clone(&running),
            Arc::clone(&diagnostics),
        );

        capture(CaptureBuffer::Pcm16(&[1; 100]));
        capture(CaptureBuffer::Pcm16(&[2; 100]));
        assert_eq!(rx.try_recv().expect("one frame").samples.len(), 160);
        assert!(rx.try_recv().is_err());

        let snap = counters(&diagnostics);
        assert_eq!(snap.capture_buffers, 2);
        assert_eq!(snap.frames_captured, 1);
    }

    #[test]
    fn capture_callback_ignores_buffers_after_stop() {
        let (tx, rx) = bounded(8);
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut capture = capture_callback(
            PcmFormat::mono16(8_000),
            4,
            tx,
            Arc::clone(&running),
            diagnostics,
        );

        running.store(false, Ordering::SeqCst);
        capture(CaptureBuffer::Pcm16(&[1, 2, 3, 4]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn playback_callback_answers_silence_after_stop() {
        let queue = Arc::new(SampleQueue::new());
        queue.enqueue(SampleBlock::from_samples(&[0x0101, 0x0101]));
        let running = Arc::new(AtomicBool::new(true));
        let mut playback = playback_callback(
            Arc::clone(&queue),
            Arc::clone(&running),
            Arc::new(SessionDiagnostics::default()),
        );

        running.store(false, Ordering::SeqCst);
        let mut out = [0xFFu8; 4];
        assert_eq!(playback(&mut out[..]), 4);
        assert_eq!(out, [0, 0, 0, 0]);
        // The queued block is untouched.
        assert_eq!(queue.queued_bytes(), 4);
    }
}
