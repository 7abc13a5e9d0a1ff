//! # voxlink-core
//!
//! Real-time audio I/O for voice transport: fixed-interval capture framing
//! and warm-up-gated playback queueing over a pluggable sound backend.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureCallback → CaptureFramer ──► frame channel ──► app
//!                                   (20 ms quanta)
//!
//! app ──► AudioPipeline::play_samples ──► SampleQueue ──► PlaybackCallback → Speaker
//!                      │
//!               PlaybackWarmupGate ──► StreamHandle::start_playback
//! ```
//!
//! The hardware callbacks never block on the application: capture frames are
//! handed off with a non-blocking send and playback reads answer an empty
//! queue with silence.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod wav;

// Convenience re-exports for downstream crates
pub use audio::device::{DeviceId, DeviceInfo, DeviceState};
pub use audio::format::PcmFormat;
pub use audio::AudioBackend;
pub use buffering::{CapturedFrame, SampleQueue};
pub use engine::{AudioPipeline, AudioStatus, PipelineConfig};
pub use error::{Result, VoxlinkError};
pub use ipc::events::{DeviceStateEvent, SessionState, SessionStatusEvent};
pub use wav::{read_wave_file, write_wave_file, AudioSampleData};

#[cfg(feature = "audio-cpal")]
pub use audio::host::CpalBackend;
