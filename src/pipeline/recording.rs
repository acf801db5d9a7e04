//! Time-bounded recording buffer for one participant.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::sink::BufferSink;
use crate::{BufferError, SinkError};

/// One slot of recorded audio: raw samples plus the exact duration the
/// engine reported for them.
struct Chunk {
    samples: Vec<i16>,
    duration: Duration,
}

/// What the buffer protects with its lock.
struct BufferState {
    /// Retained chunks, oldest first.
    chunks: VecDeque<Chunk>,
    /// Running total duration of everything in `chunks`.
    retained: Duration,
}

/// A bounded, time-windowed store of one participant's decoded audio.
///
/// The capture callback appends decoded samples as they arrive; export
/// requests stream the retained history back out. Memory stays fixed: audio
/// is coalesced into chunks of at most [`chunk_capacity`](Self::chunk_capacity)
/// samples, and once the retained duration reaches
/// [`max_history`](Self::max_history), every further append evicts the
/// oldest chunks and reuses their storage instead of allocating.
///
/// # Concurrency
///
/// Exactly one writer (the capture callback) and any number of exporting
/// readers may operate concurrently; a single mutex serializes all of them.
/// Chunk boundaries are coarse (about a second of audio) relative to the
/// lock hold time, so correctness wins over a lock-free fast path here.
///
/// # Caller contract
///
/// [`export`](Self::export) runs its sink callbacks while holding the
/// buffer's lock. A sink must not call back into the same buffer, or it will
/// deadlock on the non-reentrant lock.
pub struct RecordingBuffer {
    chunk_capacity: usize,
    max_history: Duration,
    inner: Mutex<BufferState>,
}

impl RecordingBuffer {
    /// Creates an empty buffer.
    ///
    /// `chunk_capacity` is the per-chunk sample capacity (the session default
    /// is one second of 48kHz mono, 48000 samples); `max_history` is the
    /// maximum cumulative duration retained (the session default is five
    /// minutes).
    pub fn new(chunk_capacity: usize, max_history: Duration) -> Self {
        Self {
            chunk_capacity,
            max_history,
            inner: Mutex::new(BufferState {
                chunks: VecDeque::new(),
                retained: Duration::ZERO,
            }),
        }
    }

    /// Per-chunk sample capacity.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Maximum cumulative duration retained.
    pub fn max_history(&self) -> Duration {
        self.max_history
    }

    /// Appends decoded samples with their exact duration.
    ///
    /// While the window has room, the tail chunk keeps receiving audio until
    /// an append would exceed the chunk capacity; then a new chunk is
    /// started. Once the buffer holds `max_history` of audio, the next
    /// append never coalesces: the oldest chunks are evicted until the
    /// window has room again, and the last evicted chunk's storage becomes
    /// the new tail, so a full buffer appends without allocating.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::ChunkTooLarge`] when a single input exceeds
    /// the chunk capacity. Such inputs are rejected outright - never split
    /// or silently truncated.
    pub fn append(&self, samples: &[i16], duration: Duration) -> Result<(), BufferError> {
        if samples.len() > self.chunk_capacity {
            return Err(BufferError::ChunkTooLarge {
                size: samples.len(),
                capacity: self.chunk_capacity,
            });
        }

        let mut state = self.inner.lock();

        if state.retained >= self.max_history {
            // Window full: evict from the head until it has room, reusing
            // the last evicted slot's storage for the new tail.
            let mut reused = None;
            while state.retained >= self.max_history {
                let Some(mut head) = state.chunks.pop_front() else {
                    break;
                };
                state.retained -= head.duration;
                head.samples.clear();
                head.duration = Duration::ZERO;
                reused = Some(head);
            }
            let mut chunk = reused.unwrap_or_else(|| Chunk {
                samples: Vec::with_capacity(self.chunk_capacity),
                duration: Duration::ZERO,
            });
            chunk.samples.extend_from_slice(samples);
            chunk.duration = duration;
            state.chunks.push_back(chunk);
        } else {
            match state.chunks.back_mut() {
                Some(tail) if tail.samples.len() + samples.len() <= self.chunk_capacity => {
                    tail.samples.extend_from_slice(samples);
                    tail.duration += duration;
                }
                _ => {
                    let mut chunk = Chunk {
                        samples: Vec::with_capacity(self.chunk_capacity),
                        duration: Duration::ZERO,
                    };
                    chunk.samples.extend_from_slice(samples);
                    chunk.duration = duration;
                    state.chunks.push_back(chunk);
                }
            }
        }

        state.retained += duration;
        Ok(())
    }

    /// Streams the retained history through a sink, oldest to newest.
    ///
    /// `on_chunk` is invoked once per retained chunk and `on_complete`
    /// exactly once afterwards. The whole walk happens under the buffer's
    /// lock, so the export is a consistent snapshot even while the writer
    /// keeps appending. A sink error aborts the export; `on_complete` is not
    /// called in that case.
    pub fn export(&self, sink: &mut dyn BufferSink) -> Result<(), SinkError> {
        let state = self.inner.lock();
        for chunk in &state.chunks {
            sink.on_chunk(&chunk.samples)?;
        }
        sink.on_complete()
    }

    /// Total duration of the retained audio.
    pub fn retained(&self) -> Duration {
        self.inner.lock().retained
    }

    /// Number of retained chunks.
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Returns `true` if nothing has been recorded (or everything evicted).
    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::sync::Arc;

    const SEC: Duration = Duration::from_secs(1);

    fn export_all(buffer: &RecordingBuffer) -> Vec<i16> {
        let mut sink = MemorySink::new();
        buffer.export(&mut sink).unwrap();
        sink.into_samples()
    }

    #[test]
    fn test_append_coalesces_into_tail() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        buffer.append(&[1, 2, 3, 4, 5], SEC).unwrap();
        buffer.append(&[6, 7, 8, 9, 10], SEC).unwrap();

        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.retained(), Duration::from_secs(2));
        assert_eq!(export_all(&buffer), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_overflow_starts_new_chunk_without_corrupting_first() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        buffer.append(&[1, 2, 3, 4, 5, 6], SEC).unwrap();
        buffer.append(&[7, 8, 9, 10, 11], SEC).unwrap(); // 6 + 5 > 10

        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(export_all(&buffer), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_export_is_lossless_within_window() {
        let buffer = RecordingBuffer::new(48000, Duration::from_secs(300));
        let mut expected = Vec::new();
        for i in 0..100i16 {
            let chunk: Vec<i16> = (0..480).map(|j| i.wrapping_mul(31).wrapping_add(j)).collect();
            expected.extend_from_slice(&chunk);
            buffer.append(&chunk, Duration::from_millis(10)).unwrap();
        }
        assert_eq!(export_all(&buffer), expected);
        assert_eq!(buffer.retained(), SEC);
    }

    #[test]
    fn test_export_is_idempotent() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        buffer.append(&[1, 2, 3], SEC).unwrap();
        buffer.append(&[4, 5, 6, 7, 8, 9, 10, 11], SEC).unwrap();

        assert_eq!(export_all(&buffer), export_all(&buffer));
    }

    #[test]
    fn test_export_empty_buffer_completes() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        let mut sink = MemorySink::new();
        buffer.export(&mut sink).unwrap();
        assert!(sink.is_complete());
        assert!(sink.samples().is_empty());
    }

    #[test]
    fn test_eviction_scenario() {
        // max_history = 3 units, chunk capacity = 10 samples.
        let buffer = RecordingBuffer::new(10, Duration::from_secs(3));

        // Two 5-sample/1s appends coalesce into one 10-sample chunk.
        buffer.append(&[1, 1, 1, 1, 1], SEC).unwrap();
        buffer.append(&[2, 2, 2, 2, 2], SEC).unwrap();
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.retained(), Duration::from_secs(2));

        // Third append starts a new chunk; total duration hits the limit.
        buffer.append(&[3, 3, 3, 3, 3], SEC).unwrap();
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.retained(), Duration::from_secs(3));

        // Fourth append would exceed the window, so the first (10-sample,
        // 2-unit) chunk is evicted before the new chunk is started.
        buffer.append(&[4, 4, 4, 4, 4], SEC).unwrap();
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.retained(), Duration::from_secs(2));
        assert_eq!(export_all(&buffer), vec![3, 3, 3, 3, 3, 4, 4, 4, 4, 4]);
    }

    #[test]
    fn test_eviction_keeps_newest_suffix() {
        let buffer = RecordingBuffer::new(4, Duration::from_secs(3));
        for i in 0..20i16 {
            buffer.append(&[i, i, i, i], SEC).unwrap();
            assert!(buffer.retained() <= Duration::from_secs(3));
        }
        // Only the last three 1s chunks survive.
        assert_eq!(
            export_all(&buffer),
            vec![17, 17, 17, 17, 18, 18, 18, 18, 19, 19, 19, 19]
        );
    }

    #[test]
    fn test_full_window_append_evicts_even_when_tail_has_room() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(2));
        buffer.append(&[1, 1, 1, 1, 1], SEC).unwrap();
        buffer.append(&[2, 2, 2, 2, 2], SEC).unwrap(); // coalesces, window now full

        // The tail could hold 5 more samples, but the window is full: the
        // append must evict and start a new chunk, never coalesce.
        buffer.append(&[3, 3, 3, 3, 3], SEC).unwrap();
        assert!(buffer.retained() <= Duration::from_secs(2));
        assert_eq!(export_all(&buffer), vec![3, 3, 3, 3, 3]);
    }

    #[test]
    fn test_eviction_pops_multiple_heads_when_needed() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(3));
        buffer.append(&[1; 10], Duration::from_millis(500)).unwrap();
        buffer.append(&[2; 10], Duration::from_millis(500)).unwrap();
        buffer.append(&[3; 10], Duration::from_millis(2600)).unwrap();
        assert_eq!(buffer.chunk_count(), 3);

        // Evicting only the first head (0.5s) leaves 3.1s retained, so the
        // second head must go too before the new chunk is appended.
        buffer.append(&[4; 5], Duration::from_millis(200)).unwrap();
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.retained(), Duration::from_millis(2800));

        let mut expected = vec![3i16; 10];
        expected.extend_from_slice(&[4; 5]);
        assert_eq!(export_all(&buffer), expected);
    }

    #[test]
    fn test_oversized_append_is_rejected() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        let err = buffer.append(&[0; 11], SEC).unwrap_err();
        assert_eq!(
            err,
            BufferError::ChunkTooLarge {
                size: 11,
                capacity: 10
            }
        );
        // Rejection leaves the buffer untouched.
        assert!(buffer.is_empty());
        assert_eq!(buffer.retained(), Duration::ZERO);
    }

    #[test]
    fn test_exact_capacity_append_accepted() {
        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        buffer.append(&[7; 10], SEC).unwrap();
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_sink_error_aborts_without_complete() {
        struct FailingSink {
            complete: bool,
        }
        impl BufferSink for FailingSink {
            fn on_chunk(&mut self, _samples: &[i16]) -> Result<(), SinkError> {
                Err(SinkError::custom("boom"))
            }
            fn on_complete(&mut self) -> Result<(), SinkError> {
                self.complete = true;
                Ok(())
            }
        }

        let buffer = RecordingBuffer::new(10, Duration::from_secs(60));
        buffer.append(&[1, 2, 3], SEC).unwrap();

        let mut sink = FailingSink { complete: false };
        assert!(buffer.export(&mut sink).is_err());
        assert!(!sink.complete);
    }

    /// Concurrency: one writer appending tagged chunks, several readers
    /// exporting. Every exported chunk must exactly match a completed
    /// append - no torn or interleaved samples.
    #[test]
    fn test_concurrent_append_and_export_no_torn_reads() {
        const APPENDS: usize = 2000;
        const CAPACITY: usize = 64;

        let buffer = Arc::new(RecordingBuffer::new(CAPACITY, Duration::from_secs(2)));

        // Deterministic LCG for chunk sizes.
        let mut seed: u32 = 0x2545_f491;
        let mut next_len = move || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((seed >> 16) as usize % CAPACITY) + 1
        };

        let sizes: Vec<usize> = (0..APPENDS).map(|_| next_len()).collect();
        let sizes_for_writer = sizes.clone();

        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for (tag, len) in sizes_for_writer.iter().enumerate() {
                    let chunk = vec![tag as i16; *len];
                    buffer.append(&chunk, Duration::from_millis(10)).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                let sizes = sizes.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let samples = {
                            let mut sink = MemorySink::new();
                            buffer.export(&mut sink).unwrap();
                            sink.into_samples()
                        };
                        // Segment by tag transitions; each segment must be a
                        // whole append of that tag's recorded length, and
                        // tags must be strictly increasing.
                        let mut i = 0;
                        let mut last_tag = -1i32;
                        while i < samples.len() {
                            let tag = samples[i];
                            let start = i;
                            while i < samples.len() && samples[i] == tag {
                                i += 1;
                            }
                            assert!(i32::from(tag) > last_tag, "tags out of order");
                            last_tag = i32::from(tag);
                            assert_eq!(
                                i - start,
                                sizes[tag as usize],
                                "torn chunk for tag {tag}"
                            );
                        }
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert!(buffer.retained() <= Duration::from_secs(2));
    }
}
