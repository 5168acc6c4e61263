//! Bounded single-producer/single-consumer byte queue between the realtime
//! audio callbacks and the event loop.
//!
//! Both halves are wait-free: the writer never blocks the hardware thread.
//! When a push does not fit, the bytes that do not fit are dropped (content
//! already queued is kept) and the overflow is counted and logged.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Overflow bookkeeping shared by both halves
#[derive(Debug, Default)]
pub struct FrameBufferStats {
    dropped_bytes: AtomicUsize,
    overflow_events: AtomicUsize,
    overflowing: AtomicBool,
}

impl FrameBufferStats {
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes.load(Ordering::Acquire)
    }

    /// Number of pushes that did not fit entirely
    pub fn overflow_events(&self) -> usize {
        self.overflow_events.load(Ordering::Acquire)
    }
}

/// Create a frame buffer holding at most `capacity` bytes
pub fn frame_buffer(capacity: usize) -> (FrameWriter, FrameReader) {
    let capacity = capacity.max(1);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    let stats = Arc::new(FrameBufferStats::default());
    (
        FrameWriter {
            producer,
            stats: Arc::clone(&stats),
        },
        FrameReader { consumer, stats },
    )
}

/// Producer half, owned by one side (hardware capture callback)
pub struct FrameWriter {
    producer: HeapProd<u8>,
    stats: Arc<FrameBufferStats>,
}

impl FrameWriter {
    /// Enqueue as many bytes as fit; returns the number accepted
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let accepted = self.producer.push_slice(bytes);
        let dropped = bytes.len() - accepted;

        if dropped > 0 {
            self.stats.dropped_bytes.fetch_add(dropped, Ordering::AcqRel);
            self.stats.overflow_events.fetch_add(1, Ordering::AcqRel);
            // Only the first overflow of a run is logged
            if !self.stats.overflowing.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "Frame buffer overflow: dropped {} bytes (capacity {})",
                    dropped,
                    self.capacity()
                );
            }
        } else {
            self.stats.overflowing.store(false, Ordering::Release);
        }

        accepted
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn len(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    pub fn stats(&self) -> Arc<FrameBufferStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half, owned by one side (capture pump)
pub struct FrameReader {
    consumer: HeapCons<u8>,
    stats: Arc<FrameBufferStats>,
}

impl FrameReader {
    /// Fill `out` with queued bytes, zero-padding the remainder.
    /// Returns how many real bytes were copied.
    pub fn pull_into(&mut self, out: &mut [u8]) -> usize {
        let copied = self.consumer.pop_slice(out);
        out[copied..].fill(0);
        copied
    }

    /// Always returns exactly `n` bytes, padded with silence when short
    pub fn pull(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.pull_into(&mut out);
        out
    }

    /// Take everything currently queued, in push order
    pub fn drain(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.consumer.occupied_len()];
        let copied = self.consumer.pop_slice(&mut out);
        out.truncate(copied);
        out
    }

    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn stats(&self) -> Arc<FrameBufferStats> {
        Arc::clone(&self.stats)
    }
}
