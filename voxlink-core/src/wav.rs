//! WAV file loading and recording.
//!
//! Only the session format is accepted: mono, 16-bit integer PCM at one of
//! the supported sample rates. Anything else is rejected up front rather than
//! converted, since the pipeline does no resampling.

use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::audio::format::{is_supported_rate, PcmFormat};
use crate::error::{Result, VoxlinkError};

/// Decoded samples plus the rate they were recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSampleData {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioSampleData {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Split into consecutive blocks of `quantum` each. The last block may
    /// be shorter.
    pub fn frames(&self, quantum: Duration) -> std::slice::Chunks<'_, i16> {
        let len = PcmFormat::mono16(self.sample_rate)
            .samples_per_quantum(quantum)
            .max(1);
        self.samples.chunks(len)
    }
}

/// Read a mono 16-bit WAV file recorded at 8000 or 16000 Hz.
pub fn read_wave_file(path: impl AsRef<Path>) -> Result<AudioSampleData> {
    let path = path.as_ref();
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let reject = |reason: String| VoxlinkError::InvalidWavFormat {
        path: path.to_path_buf(),
        reason,
    };
    if spec.channels != 1 {
        return Err(reject(format!("expected mono, found {} channels", spec.channels)));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(reject(format!(
            "expected 16-bit integer PCM, found {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if !is_supported_rate(spec.sample_rate) {
        return Err(reject(format!(
            "unsupported sample rate {} Hz",
            spec.sample_rate
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        "wave file loaded"
    );
    Ok(AudioSampleData::new(samples, spec.sample_rate))
}

/// Write `samples` as a mono 16-bit WAV file.
pub fn write_wave_file(path: impl AsRef<Path>, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voxlink-wav-{}-{name}.wav", std::process::id()))
    }

    #[test]
    fn written_file_reads_back() {
        let path = temp_path("read-back");
        let samples: Vec<i16> = (0..400).map(|i| (i * 37 % 2000 - 1000) as i16).collect();
        write_wave_file(&path, &samples, 8_000).expect("write");

        let data = read_wave_file(&path).expect("read");
        let _ = std::fs::remove_file(&path);
        assert_eq!(data.sample_rate, 8_000);
        assert_eq!(data.samples, samples);
        approx::assert_relative_eq!(data.duration().as_secs_f64(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let path = temp_path("rate");
        write_wave_file(&path, &[0; 100], 44_100).expect("write");

        let err = read_wave_file(&path).expect_err("44.1 kHz must be rejected");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, VoxlinkError::InvalidWavFormat { .. }));
    }

    #[test]
    fn stereo_is_rejected() {
        let path = temp_path("stereo");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        {
            let mut writer = WavWriter::create(&path, spec).expect("create");
            for _ in 0..20 {
                writer.write_sample(0i16).expect("sample");
            }
            writer.finalize().expect("finalize");
        }

        let err = read_wave_file(&path).expect_err("stereo must be rejected");
        let _ = std::fs::remove_file(&path);
        assert!(err.to_string().contains("mono"));
    }

    #[test]
    fn missing_file_is_a_wav_error() {
        let err = read_wave_file(temp_path("does-not-exist")).expect_err("missing file");
        assert!(matches!(err, VoxlinkError::Wav(_)));
    }

    #[test]
    fn frames_split_into_quanta_with_short_tail() {
        let data = AudioSampleData::new(vec![1; 350], 8_000);
        let lens: Vec<usize> = data
            .frames(Duration::from_millis(20))
            .map(<[i16]>::len)
            .collect();
        assert_eq!(lens, vec![160, 160, 30]);
    }
}
