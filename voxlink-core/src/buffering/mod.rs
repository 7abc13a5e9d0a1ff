//! Real-time buffering primitives shared by the capture and playback paths.
//!
//! - [`queue::SampleQueue`]: mutex-guarded FIFO pulled by the playback callback.
//! - [`framer::CaptureFramer`]: turns arbitrary capture chunks into 20 ms frames.
//! - [`warmup::PlaybackWarmupGate`]: defers output start until a few frames are queued.

pub mod framer;
pub mod queue;
pub mod warmup;

pub use framer::{CaptureFramer, CapturedFrame, ChannelListener, FrameListener};
pub use queue::{SampleBlock, SampleQueue};
pub use warmup::{PlaybackWarmupGate, WarmupOutcome};
