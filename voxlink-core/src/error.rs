use thiserror::Error;

/// All errors produced by voxlink-core.
#[derive(Debug, Error)]
pub enum VoxlinkError {
    #[error("invalid sample rate {0} Hz (supported: 8000, 16000)")]
    InvalidSampleRate(u32),

    #[error("audio device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("no audio devices available")]
    NoDevicesAvailable,

    #[error("audio session already started")]
    AlreadyStarted,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("failed to start playback: {0}")]
    PlaybackStart(String),

    #[error("failed to stop audio: {0}")]
    Stop(String),

    #[error("sample block of {0} bytes does not hold a whole number of 16-bit samples")]
    InvalidSampleBlock(usize),

    #[error("invalid wave file format for '{path}': {reason}")]
    InvalidWavFormat {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("wave file error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxlinkError>;
