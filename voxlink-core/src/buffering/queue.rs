//! Playback sample queue.
//!
//! The application pushes post-processed audio with [`SampleQueue::enqueue`];
//! the hardware playback callback pulls bytes with [`SampleQueue::read`].
//! Both sides share one `parking_lot::Mutex`. The critical section in `read`
//! is a bounded memcpy plus `VecDeque` pops, so the callback never waits on
//! anything but another short `enqueue`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::audio::format::samples_to_le_bytes;
use crate::error::{Result, VoxlinkError};

/// An immutable block of little-endian 16-bit mono PCM.
///
/// Always holds a whole number of samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock(Box<[u8]>);

impl SampleBlock {
    /// Encode `samples` as little-endian bytes.
    pub fn from_samples(samples: &[i16]) -> Self {
        Self(samples_to_le_bytes(samples).into_boxed_slice())
    }

    /// Wrap raw bytes, rejecting a trailing half sample.
    pub fn try_from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(VoxlinkError::InvalidSampleBlock(bytes.len()));
        }
        Ok(Self(bytes.into_boxed_slice()))
    }

    /// `sample_count` zero-valued samples.
    pub fn silence(sample_count: usize) -> Self {
        Self(vec![0u8; sample_count * 2].into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }
}

struct QueueInner {
    blocks: VecDeque<SampleBlock>,
    queued_bytes: usize,
}

/// Thread-safe FIFO of [`SampleBlock`]s feeding a playback callback.
pub struct SampleQueue {
    inner: Mutex<QueueInner>,
    /// Reads that found the queue empty and synthesized silence.
    underruns: AtomicUsize,
    /// Reads that drained the queue before filling the request.
    short_reads: AtomicUsize,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                blocks: VecDeque::with_capacity(64),
                queued_bytes: 0,
            }),
            underruns: AtomicUsize::new(0),
            short_reads: AtomicUsize::new(0),
        }
    }

    /// Append a block to the tail. Empty blocks are ignored.
    pub fn enqueue(&self, block: SampleBlock) {
        if block.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.queued_bytes += block.len();
        inner.blocks.push_back(block);
    }

    /// Fill `out` from the head of the queue and return the number of bytes written.
    ///
    /// - Empty queue: `out` is zeroed and its full length is returned, so the
    ///   output device keeps running on silence.
    /// - Otherwise blocks are drained in FIFO order until `out` is full or the
    ///   queue runs dry. A block that does not fit is truncated and its tail is
    ///   discarded. Running dry mid-call returns a short count and leaves the
    ///   rest of `out` untouched.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let requested = out.len();
        let mut inner = self.inner.lock();

        if inner.blocks.is_empty() {
            out.fill(0);
            drop(inner);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return requested;
        }

        let mut written = 0;
        while written < requested {
            let Some(block) = inner.blocks.pop_front() else {
                break;
            };
            inner.queued_bytes -= block.len();
            let copy_len = block.len().min(requested - written);
            out[written..written + copy_len].copy_from_slice(&block.as_bytes()[..copy_len]);
            written += copy_len;
        }
        drop(inner);

        if written < requested {
            self.short_reads.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Total bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.inner.lock().queued_bytes
    }

    pub fn queued_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().blocks.is_empty()
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.blocks.clear();
        inner.queued_bytes = 0;
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn short_reads(&self) -> usize {
        self.short_reads.load(Ordering::Relaxed)
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SampleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleQueue")
            .field("queued_bytes", &self.queued_bytes())
            .field("underruns", &self.underruns())
            .field("short_reads", &self.short_reads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    fn block(bytes: &[u8]) -> SampleBlock {
        SampleBlock::try_from_bytes(bytes.to_vec()).expect("even-length block")
    }

    #[test]
    fn empty_queue_reads_full_silence() {
        let queue = SampleQueue::new();
        let mut out = vec![0xAAu8; 320];
        assert_eq!(queue.read(&mut out), 320);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(queue.underruns(), 1);
    }

    #[test]
    fn zero_length_read_on_empty_queue_returns_zero() {
        let queue = SampleQueue::new();
        let mut out: [u8; 0] = [];
        assert_eq!(queue.read(&mut out), 0);
    }

    #[test]
    fn exact_read_returns_fifo_concatenation() {
        let queue = SampleQueue::new();
        queue.enqueue(block(&[1, 2, 3, 4]));
        queue.enqueue(block(&[5, 6]));
        queue.enqueue(block(&[7, 8, 9, 10]));

        let mut out = vec![0u8; 10];
        assert_eq!(queue.read(&mut out), 10);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert!(queue.is_empty());
        assert_eq!(queue.queued_bytes(), 0);
    }

    #[test]
    fn truncated_block_tail_is_dropped() {
        let queue = SampleQueue::new();
        queue.enqueue(block(&[1, 2, 3, 4]));
        queue.enqueue(block(&[5, 6, 7, 8]));
        queue.enqueue(block(&[9, 10]));

        let mut out = vec![0u8; 6];
        assert_eq!(queue.read(&mut out), 6);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);

        // [7, 8] were discarded with their block; the next block is intact.
        assert_eq!(queue.queued_blocks(), 1);
        let mut next = vec![0u8; 2];
        assert_eq!(queue.read(&mut next), 2);
        assert_eq!(next, vec![9, 10]);
    }

    #[test]
    fn draining_mid_call_returns_short_without_padding() {
        let queue = SampleQueue::new();
        queue.enqueue(block(&[1, 2, 3, 4]));

        let mut out = vec![0xEEu8; 8];
        assert_eq!(queue.read(&mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(&out[4..], &[0xEE; 4]);
        assert_eq!(queue.short_reads(), 1);
        assert_eq!(queue.underruns(), 0);
    }

    #[test]
    fn read_after_drain_falls_back_to_silence() {
        let queue = SampleQueue::new();
        queue.enqueue(SampleBlock::from_samples(&[100, 200]));
        let mut out = vec![0u8; 4];
        assert_eq!(queue.read(&mut out), 4);

        let mut out = vec![0xFFu8; 4];
        assert_eq!(queue.read(&mut out), 4);
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn odd_length_block_is_rejected() {
        let err = SampleBlock::try_from_bytes(vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, VoxlinkError::InvalidSampleBlock(3)));
    }

    #[test]
    fn empty_blocks_are_not_queued() {
        let queue = SampleQueue::new();
        queue.enqueue(SampleBlock::from_samples(&[]));
        assert!(queue.is_empty());
    }

    #[test]
    fn silence_block_is_all_zero_samples() {
        let silence = SampleBlock::silence(160);
        assert_eq!(silence.sample_count(), 160);
        assert!(silence.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        const BLOCKS: i16 = 500;
        let queue = Arc::new(SampleQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..BLOCKS {
                    queue.enqueue(SampleBlock::from_samples(&[i, i]));
                }
            })
        };

        let mut received = Vec::new();
        let mut out = [0u8; 4];
        while received.len() < BLOCKS as usize {
            // Only collect reads that came from real blocks; silence reads
            // are indistinguishable from sample 0 so skip while empty.
            if queue.is_empty() {
                thread::yield_now();
                continue;
            }
            let n = queue.read(&mut out);
            assert_eq!(n, 4);
            let first = i16::from_le_bytes([out[0], out[1]]);
            let second = i16::from_le_bytes([out[2], out[3]]);
            assert_eq!(first, second);
            received.push(first);
        }
        producer.join().expect("producer thread panicked");

        let expected: Vec<i16> = (0..BLOCKS).collect();
        assert_eq!(received, expected);
    }
}
