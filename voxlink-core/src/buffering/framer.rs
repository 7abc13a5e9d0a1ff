//! Capture framer: reshapes irregular capture callbacks into fixed 20 ms frames.
//!
//! The hardware hands over whatever it has, which is rarely exactly one
//! quantum. `CaptureFramer` copies samples into a fixed accumulator and, each
//! time it fills, hands an immutable snapshot to its [`FrameListener`].
//!
//! The framer is owned by the capture callback and is not internally locked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

/// One completed capture quantum.
///
/// The samples are shared immutably; receivers may clone the frame freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Mono 16-bit samples, exactly one quantum long.
    pub samples: Arc<[i16]>,
    /// Sample rate in Hz (8000 or 16000).
    pub sample_rate: u32,
    /// Zero-based frame counter within the session.
    pub seq: u64,
}

impl CapturedFrame {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Receives completed frames.
///
/// Called on the capture thread. Implementations must return promptly and
/// must not block; hand heavy work to another thread.
pub trait FrameListener: Send + 'static {
    fn on_frame(&mut self, frame: CapturedFrame);
}

impl<F> FrameListener for F
where
    F: FnMut(CapturedFrame) + Send + 'static,
{
    fn on_frame(&mut self, frame: CapturedFrame) {
        self(frame)
    }
}

/// Forwards frames into a crossbeam channel with `try_send`.
///
/// A full channel drops the frame rather than stalling the capture thread.
pub struct ChannelListener {
    tx: Sender<CapturedFrame>,
    dropped: Arc<AtomicU64>,
}

impl ChannelListener {
    pub fn new(tx: Sender<CapturedFrame>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }
}

impl FrameListener for ChannelListener {
    fn on_frame(&mut self, frame: CapturedFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Log the first drop and then every 50th (once a second at 20 ms).
                if dropped == 1 || dropped % 50 == 0 {
                    warn!(seq = frame.seq, dropped, "frame channel full, dropping capture frame");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("frame receiver gone, dropping capture frame");
            }
        }
    }
}

/// Accumulates mono 16-bit samples into fixed-size frames.
pub struct CaptureFramer {
    buffer: Vec<i16>,
    index: usize,
    sample_rate: u32,
    next_seq: u64,
    /// Low byte of a sample split across two `push_bytes` calls.
    carry: Option<u8>,
    listener: Box<dyn FrameListener>,
}

impl CaptureFramer {
    /// Create a framer emitting frames of `frame_samples` samples.
    ///
    /// # Panics
    /// Panics if `frame_samples` is zero.
    pub fn new(frame_samples: usize, sample_rate: u32, listener: impl FrameListener) -> Self {
        assert!(frame_samples > 0, "frame capacity must be non-zero");
        Self {
            buffer: vec![0; frame_samples],
            index: 0,
            sample_rate,
            next_seq: 0,
            carry: None,
            listener: Box::new(listener),
        }
    }

    /// Samples per emitted frame.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Samples buffered toward the next frame.
    pub fn pending(&self) -> usize {
        self.index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_emitted(&self) -> u64 {
        self.next_seq
    }

    /// Consume `samples`, emitting a frame every time the accumulator fills.
    pub fn push(&mut self, samples: &[i16]) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.buffer.len() - self.index;
            let take = room.min(rest.len());
            self.buffer[self.index..self.index + take].copy_from_slice(&rest[..take]);
            self.index += take;
            rest = &rest[take..];

            if self.index == self.buffer.len() {
                self.emit();
            }
        }
    }

    /// Consume raw little-endian 16-bit PCM bytes.
    ///
    /// An odd trailing byte is held and paired with the first byte of the
    /// next call.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    self.push_one(i16::from_le_bytes([low, high]));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }

        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.push_one(i16::from_le_bytes([pair[0], pair[1]]));
        }
        if let [low] = pairs.remainder() {
            self.carry = Some(*low);
        }
    }

    /// Discard any partial frame and restart sequence numbering.
    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.index = 0;
        self.next_seq = 0;
        self.carry = None;
    }

    fn push_one(&mut self, sample: i16) {
        self.buffer[self.index] = sample;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.emit();
        }
    }

    fn emit(&mut self) {
        let frame = CapturedFrame {
            samples: Arc::from(&self.buffer[..]),
            sample_rate: self.sample_rate,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.buffer.fill(0);
        self.index = 0;
        self.listener.on_frame(frame);
    }
}

impl std::fmt::Debug for CaptureFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureFramer")
            .field("capacity", &self.buffer.len())
            .field("pending", &self.index)
            .field("sample_rate", &self.sample_rate)
            .field("frames_emitted", &self.next_seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::bounded;
    use parking_lot::Mutex;

    fn collecting_framer(capacity: usize) -> (CaptureFramer, Arc<Mutex<Vec<CapturedFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let framer = CaptureFramer::new(capacity, 8_000, move |frame: CapturedFrame| {
            sink.lock().push(frame);
        });
        (framer, frames)
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 30_000) as i16).collect()
    }

    #[test]
    fn partial_push_emits_nothing() {
        let (mut framer, frames) = collecting_framer(160);
        framer.push(&ramp(159));
        assert!(frames.lock().is_empty());
        assert_eq!(framer.pending(), 159);
    }

    #[test]
    fn three_hundred_fifty_samples_emit_two_frames() {
        let (mut framer, frames) = collecting_framer(160);
        let input = ramp(350);
        framer.push(&input);

        let frames = frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].samples[..], &input[..160]);
        assert_eq!(&frames[1].samples[..], &input[160..320]);
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[1].seq, 1);
        assert_eq!(frames[0].sample_rate, 8_000);
        assert_eq!(framer.pending(), 30);
    }

    #[test]
    fn frames_are_identical_for_any_split() {
        let input = ramp(1_000);

        let (mut whole, whole_frames) = collecting_framer(160);
        whole.push(&input);

        for split in [1usize, 7, 159, 160, 161, 333] {
            let (mut pieces, piece_frames) = collecting_framer(160);
            for chunk in input.chunks(split) {
                pieces.push(chunk);
            }
            assert_eq!(*piece_frames.lock(), *whole_frames.lock(), "split={split}");
            assert_eq!(pieces.pending(), whole.pending(), "split={split}");
        }
    }

    #[test]
    fn byte_pushes_decode_little_endian_across_odd_splits() {
        let samples = ramp(480);
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let (mut framer, frames) = collecting_framer(160);
        for chunk in bytes.chunks(33) {
            framer.push_bytes(chunk);
        }

        let frames = frames.lock();
        assert_eq!(frames.len(), 3);
        let rebuilt: Vec<i16> = frames.iter().flat_map(|f| f.samples.iter().copied()).collect();
        assert_eq!(rebuilt, samples);
    }

    #[test]
    fn emitted_snapshot_is_independent_of_accumulator() {
        let (mut framer, frames) = collecting_framer(4);
        framer.push(&[1, 2, 3, 4]);
        framer.push(&[9, 9]);
        assert_eq!(&frames.lock()[0].samples[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let (mut framer, frames) = collecting_framer(4);
        framer.push(&[1, 2, 3]);
        framer.reset();
        framer.push(&[5, 6, 7, 8]);

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].samples[..], &[5, 6, 7, 8]);
        assert_eq!(frames[0].seq, 0);
    }

    #[test]
    fn frame_duration_is_one_quantum() {
        let frame = CapturedFrame {
            samples: Arc::from(vec![0i16; 320]),
            sample_rate: 16_000,
            seq: 0,
        };
        assert_eq!(frame.duration(), Duration::from_millis(20));
    }

    #[test]
    fn channel_listener_drops_when_full_without_blocking() {
        let (tx, rx) = bounded(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut framer = CaptureFramer::new(2, 8_000, ChannelListener::new(tx, Arc::clone(&dropped)));

        framer.push(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        let first = rx.try_recv().expect("first frame delivered");
        assert_eq!(&first.samples[..], &[1, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_listener_tolerates_disconnected_receiver() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut framer = CaptureFramer::new(2, 8_000, ChannelListener::new(tx, Arc::clone(&dropped)));
        framer.push(&[1, 2]);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }
}
