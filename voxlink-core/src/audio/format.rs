//! PCM format descriptor and little-endian sample helpers.
//!
//! Every session runs a single format: mono, signed 16-bit linear PCM at
//! 8000 or 16000 Hz. Capture and playback share the same descriptor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample rates accepted by a session (Hz).
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [8_000, 16_000];

/// Capture frame quantum: 20 ms, i.e. 50 frames per second.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Hardware playback buffers queued before output starts.
pub const DEFAULT_WARMUP_BUFFERS: usize = 5;

/// Returns `true` if `rate` is one of [`SUPPORTED_SAMPLE_RATES`].
pub fn is_supported_rate(rate: u32) -> bool {
    SUPPORTED_SAMPLE_RATES.contains(&rate)
}

/// Describes the PCM layout used on both the capture and playback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Mono 16-bit linear PCM at `sample_rate`.
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per sample frame across all channels.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    pub fn byte_rate(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Number of samples (per channel) covering `quantum`.
    ///
    /// 20 ms at 8000 Hz = 160 samples; at 16000 Hz = 320 samples.
    pub fn samples_per_quantum(&self, quantum: Duration) -> usize {
        (self.sample_rate as u128 * quantum.as_micros() / 1_000_000) as usize
    }

    pub fn bytes_per_quantum(&self, quantum: Duration) -> usize {
        self.samples_per_quantum(quantum) * self.block_align()
    }
}

/// Encode samples as little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode little-endian byte pairs into `out`. A trailing odd byte is ignored.
pub fn le_bytes_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_sizes_for_supported_rates() {
        assert_eq!(PcmFormat::mono16(8_000).samples_per_quantum(FRAME_DURATION), 160);
        assert_eq!(PcmFormat::mono16(16_000).samples_per_quantum(FRAME_DURATION), 320);
        assert_eq!(PcmFormat::mono16(8_000).bytes_per_quantum(FRAME_DURATION), 320);
    }

    #[test]
    fn byte_rate_matches_mono16() {
        let fmt = PcmFormat::mono16(16_000);
        assert_eq!(fmt.block_align(), 2);
        assert_eq!(fmt.byte_rate(), 32_000);
    }

    #[test]
    fn only_narrowband_and_wideband_are_supported() {
        assert!(is_supported_rate(8_000));
        assert!(is_supported_rate(16_000));
        assert!(!is_supported_rate(22_050));
        assert!(!is_supported_rate(48_000));
    }

    #[test]
    fn le_encoding_is_little_endian() {
        let bytes = samples_to_le_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);

        let mut decoded = Vec::new();
        le_bytes_to_samples(&bytes, &mut decoded);
        assert_eq!(decoded, vec![1, -2, 0x1234]);
    }

    #[test]
    fn odd_trailing_byte_is_ignored_by_decoder() {
        let mut decoded = Vec::new();
        le_bytes_to_samples(&[0x10, 0x00, 0x7F], &mut decoded);
        assert_eq!(decoded, vec![0x10]);
    }
}
