//! Playback warm-up gate.
//!
//! Output must not start the moment the first frame arrives or the device
//! would underrun immediately. The gate counts frames fed to the playback
//! queue and only attempts to start the output device once more than
//! `threshold` frames have been delivered. Frames before that point are still
//! queued; only the device start is deferred.
//!
//! A successful start latches the gate open for the rest of the session.
//! A failed start leaves it closed so the next frame tries again.

use tracing::{info, warn};

use crate::error::Result;

/// What happened on a single [`PlaybackWarmupGate::on_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Still building the initial buffer; no start attempted.
    Buffering,
    /// Start attempted and succeeded on this frame.
    Started,
    /// Start attempted and failed; it will be retried on the next frame.
    StartFailed,
    /// Gate was already open; nothing to do.
    AlreadyStarted,
}

#[derive(Debug, Clone)]
pub struct PlaybackWarmupGate {
    threshold: usize,
    frames_received: u64,
    started: bool,
}

impl PlaybackWarmupGate {
    /// `threshold` is the number of hardware playback buffers to fill first.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            frames_received: 0,
            started: false,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Frames delivered since the session (or last reset) began.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn is_open(&self) -> bool {
        self.started
    }

    /// Record one delivered frame and start playback if the threshold has
    /// been crossed.
    ///
    /// `start` is only invoked while the gate is closed and
    /// `frames_received > threshold`.
    pub fn on_frame<F>(&mut self, start: F) -> WarmupOutcome
    where
        F: FnOnce() -> Result<()>,
    {
        self.frames_received = self.frames_received.saturating_add(1);

        if self.started {
            return WarmupOutcome::AlreadyStarted;
        }
        if self.frames_received <= self.threshold as u64 {
            return WarmupOutcome::Buffering;
        }

        match start() {
            Ok(()) => {
                self.started = true;
                info!(
                    frames = self.frames_received,
                    threshold = self.threshold,
                    "playback started after warm-up"
                );
                WarmupOutcome::Started
            }
            Err(e) => {
                warn!(
                    frames = self.frames_received,
                    "unable to start playback, retrying on next frame: {e}"
                );
                WarmupOutcome::StartFailed
            }
        }
    }

    pub fn reset(&mut self) {
        self.frames_received = 0;
        self.started = false;
    }
}

impl Default for PlaybackWarmupGate {
    fn default() -> Self {
        Self::new(crate::audio::format::DEFAULT_WARMUP_BUFFERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::VoxlinkError;

    #[test]
    fn no_start_until_threshold_exceeded() {
        let mut gate = PlaybackWarmupGate::new(5);
        let mut attempts = 0;

        for _ in 0..5 {
            let outcome = gate.on_frame(|| {
                attempts += 1;
                Ok(())
            });
            assert_eq!(outcome, WarmupOutcome::Buffering);
        }
        assert_eq!(attempts, 0);

        let outcome = gate.on_frame(|| {
            attempts += 1;
            Ok(())
        });
        assert_eq!(outcome, WarmupOutcome::Started);
        assert_eq!(attempts, 1);
        assert!(gate.is_open());
    }

    #[test]
    fn latched_gate_never_restarts() {
        let mut gate = PlaybackWarmupGate::new(0);
        assert_eq!(gate.on_frame(|| Ok(())), WarmupOutcome::Started);

        let mut attempts = 0;
        for _ in 0..20 {
            let outcome = gate.on_frame(|| {
                attempts += 1;
                Ok(())
            });
            assert_eq!(outcome, WarmupOutcome::AlreadyStarted);
        }
        assert_eq!(attempts, 0);
        assert_eq!(gate.frames_received(), 21);
    }

    #[test]
    fn failed_start_is_retried_on_next_frame() {
        let mut gate = PlaybackWarmupGate::new(2);
        gate.on_frame(|| Ok(()));
        gate.on_frame(|| Ok(()));

        let outcome = gate.on_frame(|| Err(VoxlinkError::PlaybackStart("device busy".into())));
        assert_eq!(outcome, WarmupOutcome::StartFailed);
        assert!(!gate.is_open());

        let outcome = gate.on_frame(|| Ok(()));
        assert_eq!(outcome, WarmupOutcome::Started);
        assert!(gate.is_open());
    }

    #[test]
    fn reset_rearms_warmup() {
        let mut gate = PlaybackWarmupGate::new(1);
        gate.on_frame(|| Ok(()));
        gate.on_frame(|| Ok(()));
        assert!(gate.is_open());

        gate.reset();
        assert!(!gate.is_open());
        assert_eq!(gate.frames_received(), 0);
        assert_eq!(gate.on_frame(|| Ok(())), WarmupOutcome::Buffering);
    }
}
