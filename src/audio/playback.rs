//! Bounded playback queue between the synthesis worker and the output device.
//!
//! [`playback_buffer`] returns the two halves of a single-producer /
//! single-consumer queue of [`AudioChunk`]s:
//!
//! * [`PlaybackProducer`]: owned by the synthesis worker.  [`push`] blocks
//!   when the queue is full; the worker is a background thread so
//!   back-pressure is harmless there.
//! * [`PlaybackConsumer`]: moved into the hardware output callback.  It owns
//!   the *carry* (the chunk being played plus a read cursor) and only ever
//!   polls the queue without blocking.
//!
//! Synthesized sentences arrive as variable-length chunks while the device
//! asks for fixed-size blocks; the carry bridges the two.  Played chunks go
//! back to the producer through a second bounded channel and are freed on
//! its side, so the callback neither allocates nor frees.
//!
//! ```rust
//! use voice_assistant::audio::{playback_buffer, AudioChunk};
//!
//! let (producer, mut consumer) = playback_buffer(8);
//! producer.push(AudioChunk::Samples(vec![0.1, 0.2, 0.3])).unwrap();
//! producer.push(AudioChunk::EndOfUtterance).unwrap();
//!
//! let (block, stop) = consumer.pull_exact(5);
//! assert_eq!(block, vec![0.1, 0.2, 0.3, 0.0, 0.0]);
//! assert!(stop);
//! ```
//!
//! [`push`]: PlaybackProducer::push

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One item of the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioChunk {
    /// Mono `f32` samples at the output sample rate (one sentence, or one
    /// segment of a sentence).
    Samples(Vec<f32>),
    /// No further chunks follow for the current spoken response.
    EndOfUtterance,
}

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Reasons a push onto the playback queue can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// Non-blocking push found the queue at capacity.
    #[error("playback buffer is full")]
    BufferFull,

    /// The consumer (output device) has been dropped.
    #[error("playback consumer is gone")]
    Closed,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Create a playback queue holding at most `capacity` chunks.
///
/// # Panics
///
/// Panics if `capacity == 0`.
pub fn playback_buffer(capacity: usize) -> (PlaybackProducer, PlaybackConsumer) {
    assert!(capacity > 0, "playback buffer capacity must be > 0");
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    // Queued chunks plus the one being played.
    let (spent_tx, spent_rx) = crossbeam_channel::bounded(capacity + 1);
    (
        PlaybackProducer { tx, spent: spent_rx },
        PlaybackConsumer {
            rx,
            spent: spent_tx,
            current: Vec::new(),
            cursor: 0,
            monitor: PlaybackMonitor::new(),
        },
    )
}

// ---------------------------------------------------------------------------
// PlaybackProducer
// ---------------------------------------------------------------------------

/// Sending half of the playback queue.
///
/// Cloneable so a fresh synthesis worker can be handed a producer per
/// utterance; only one worker is active at a time, which keeps chunks in
/// sentence order.
#[derive(Debug, Clone)]
pub struct PlaybackProducer {
    tx: Sender<AudioChunk>,
    /// Chunks the device has finished with.
    spent: Receiver<Vec<f32>>,
}

impl PlaybackProducer {
    /// Enqueue `item`, blocking while the queue is at capacity.
    pub fn push(&self, item: AudioChunk) -> Result<(), PlaybackError> {
        self.release_spent();
        self.tx.send(item).map_err(|_| PlaybackError::Closed)
    }

    /// Enqueue `item` without blocking.
    pub fn try_push(&self, item: AudioChunk) -> Result<(), PlaybackError> {
        self.release_spent();
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => PlaybackError::BufferFull,
            TrySendError::Disconnected(_) => PlaybackError::Closed,
        })
    }

    /// Number of chunks currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    fn release_spent(&self) {
        self.spent.try_iter().for_each(drop);
    }
}

// ---------------------------------------------------------------------------
// PlaybackConsumer
// ---------------------------------------------------------------------------

/// Receiving half of the playback queue plus the carry.
///
/// Every method is wait-free with respect to the producer: both channels
/// are only used with `try_recv`/`try_send`, and the carry is owned
/// outright.
#[derive(Debug)]
pub struct PlaybackConsumer {
    rx: Receiver<AudioChunk>,
    spent: Sender<Vec<f32>>,
    /// Chunk being played; `current[cursor..]` is still unplayed.
    current: Vec<f32>,
    cursor: usize,
    monitor: PlaybackMonitor,
}

impl PlaybackConsumer {
    /// Fill `out` completely and return `true` when the current utterance
    /// has finished playing with this block.
    ///
    /// * Enough carried samples → the first `out.len()` are played, the rest
    ///   stay carried.
    /// * [`AudioChunk::EndOfUtterance`] dequeued → remaining samples are
    ///   played, the block is padded with silence, the carry is reset
    ///   and `true` is returned.
    /// * Queue momentarily empty → whatever is carried is played and padded
    ///   with silence; the stream stays open.
    pub fn fill(&mut self, out: &mut [f32]) -> bool {
        let mut written = 0;
        loop {
            let unplayed = &self.current[self.cursor..];
            let n = unplayed.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&unplayed[..n]);
            written += n;
            self.cursor += n;
            if written == out.len() {
                return false;
            }

            self.retire_current();
            match self.rx.try_recv() {
                Ok(AudioChunk::Samples(samples)) => self.current = samples,
                Ok(AudioChunk::EndOfUtterance) => {
                    out[written..].fill(0.0);
                    self.monitor.record_end();
                    return true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    out[written..].fill(0.0);
                    return false;
                }
            }
        }
    }

    /// Hand the played chunk back to the producer side.
    fn retire_current(&mut self) {
        self.cursor = 0;
        let spent = std::mem::take(&mut self.current);
        if spent.capacity() > 0 {
            // Full only if the producer stopped pushing; dropping here is rare.
            let _ = self.spent.try_send(spent);
        }
    }

    /// Allocating convenience over [`fill`](Self::fill): returns exactly
    /// `frame_count` samples and the stop flag.
    pub fn pull_exact(&mut self, frame_count: usize) -> (Vec<f32>, bool) {
        let mut block = vec![0.0_f32; frame_count];
        let stop = self.fill(&mut block);
        (block, stop)
    }

    /// Samples of the current chunk not yet played.
    pub fn carried(&self) -> usize {
        self.current.len() - self.cursor
    }

    /// Handle used to observe completed utterances from another thread.
    pub fn monitor(&self) -> PlaybackMonitor {
        self.monitor.clone()
    }
}

// ---------------------------------------------------------------------------
// PlaybackMonitor
// ---------------------------------------------------------------------------

/// Counts utterances whose end marker has been played.
///
/// The consumer increments it from the output callback (a single atomic
/// add); the controller polls it to know when the speaker has gone quiet.
#[derive(Debug, Clone, Default)]
pub struct PlaybackMonitor {
    completed: Arc<AtomicUsize>,
}

impl PlaybackMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Utterances fully played so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    fn record_end(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Wait until at least `target` utterances have completed.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for(&self, target: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.completed() < target {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(range: std::ops::Range<usize>) -> Vec<f32> {
        range.map(|i| i as f32).collect()
    }

    #[test]
    fn end_of_utterance_pads_and_stops_then_next_utterance_starts_clean() {
        let (producer, mut consumer) = playback_buffer(8);

        producer.push(AudioChunk::Samples(vec![0.1, 0.2, 0.3])).unwrap();
        producer.push(AudioChunk::EndOfUtterance).unwrap();

        let (block, stop) = consumer.pull_exact(5);
        assert_eq!(block, vec![0.1, 0.2, 0.3, 0.0, 0.0]);
        assert!(stop);
        assert_eq!(consumer.carried(), 0);

        producer
            .push(AudioChunk::Samples(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let (block, stop) = consumer.pull_exact(2);
        assert_eq!(block, vec![1.0, 2.0]);
        assert!(!stop);
        assert_eq!(consumer.carried(), 2);
    }

    #[test]
    fn stop_is_reported_exactly_once_per_utterance() {
        let (producer, mut consumer) = playback_buffer(8);
        producer.push(AudioChunk::Samples(samples(0..10))).unwrap();
        producer.push(AudioChunk::EndOfUtterance).unwrap();

        let stops: Vec<bool> = (0..6).map(|_| consumer.pull_exact(4).1).collect();
        assert_eq!(stops, vec![false, false, true, false, false, false]);
        assert_eq!(consumer.monitor().completed(), 1);
    }

    #[test]
    fn carry_survives_across_blocks() {
        let (producer, mut consumer) = playback_buffer(8);
        producer.push(AudioChunk::Samples(samples(0..5))).unwrap();
        producer.push(AudioChunk::Samples(samples(5..9))).unwrap();

        assert_eq!(consumer.pull_exact(3).0, vec![0.0, 1.0, 2.0]);
        assert_eq!(consumer.pull_exact(3).0, vec![3.0, 4.0, 5.0]);
        assert_eq!(consumer.pull_exact(3).0, vec![6.0, 7.0, 8.0]);
        assert_eq!(consumer.carried(), 0);
    }

    #[test]
    fn underrun_pads_with_silence_without_stopping() {
        let (producer, mut consumer) = playback_buffer(8);
        producer.push(AudioChunk::Samples(vec![0.5, 0.5])).unwrap();

        let (block, stop) = consumer.pull_exact(4);
        assert_eq!(block, vec![0.5, 0.5, 0.0, 0.0]);
        assert!(!stop);

        let (block, stop) = consumer.pull_exact(4);
        assert_eq!(block, vec![0.0; 4]);
        assert!(!stop);
    }

    #[test]
    fn empty_queue_yields_silence() {
        let (_producer, mut consumer) = playback_buffer(4);
        let (block, stop) = consumer.pull_exact(1024);
        assert_eq!(block.len(), 1024);
        assert!(block.iter().all(|&s| s == 0.0));
        assert!(!stop);
    }

    #[test]
    fn always_returns_requested_length_for_any_interleaving() {
        let (producer, mut consumer) = playback_buffer(64);
        let chunk_lens = [1usize, 7, 0, 33, 2, 128, 5];
        let frame_counts = [1usize, 3, 16, 64, 5, 100];

        let mut step = 0usize;
        for round in 0..40 {
            let len = chunk_lens[round % chunk_lens.len()];
            producer.push(AudioChunk::Samples(vec![0.25; len])).unwrap();
            if round % 9 == 8 {
                producer.push(AudioChunk::EndOfUtterance).unwrap();
            }
            for _ in 0..(round % 3) + 1 {
                let n = frame_counts[step % frame_counts.len()];
                step += 1;
                let (block, _) = consumer.pull_exact(n);
                assert_eq!(block.len(), n);
            }
        }
    }

    #[test]
    fn every_real_sample_is_played_in_order() {
        let (producer, mut consumer) = playback_buffer(16);
        producer.push(AudioChunk::Samples(samples(1..8))).unwrap();
        producer.push(AudioChunk::Samples(samples(8..20))).unwrap();
        producer.push(AudioChunk::EndOfUtterance).unwrap();

        let mut played = Vec::new();
        loop {
            let (block, stop) = consumer.pull_exact(6);
            played.extend(block);
            if stop {
                break;
            }
        }
        played.retain(|&s| s != 0.0);
        assert_eq!(played, samples(1..20));
    }

    #[test]
    fn played_chunks_are_released_by_the_producer() {
        let (producer, mut consumer) = playback_buffer(4);
        producer.push(AudioChunk::Samples(samples(0..3))).unwrap();
        producer.push(AudioChunk::Samples(samples(3..6))).unwrap();

        consumer.pull_exact(4);
        assert_eq!(producer.spent.len(), 1);
        assert_eq!(consumer.carried(), 2);

        producer.push(AudioChunk::EndOfUtterance).unwrap();
        assert!(producer.spent.is_empty());

        assert!(consumer.pull_exact(4).1);
        assert_eq!(producer.spent.len(), 1);
    }

    #[test]
    fn device_keeps_playing_when_spent_chunks_pile_up() {
        let (producer, mut consumer) = playback_buffer(1);
        for _ in 0..5 {
            // Bypass `push` so nothing is released.
            producer.tx.try_send(AudioChunk::Samples(vec![0.5; 2])).unwrap();
            assert_eq!(consumer.pull_exact(2).0, vec![0.5, 0.5]);
        }
        assert_eq!(producer.spent.len(), 2);
    }

    #[test]
    fn try_push_reports_buffer_full() {
        let (producer, _consumer) = playback_buffer(1);
        producer.try_push(AudioChunk::EndOfUtterance).unwrap();
        assert_eq!(
            producer.try_push(AudioChunk::EndOfUtterance),
            Err(PlaybackError::BufferFull)
        );
        assert_eq!(producer.len(), 1);
    }

    #[test]
    fn push_fails_once_consumer_is_dropped() {
        let (producer, consumer) = playback_buffer(2);
        drop(consumer);
        assert_eq!(
            producer.push(AudioChunk::EndOfUtterance),
            Err(PlaybackError::Closed)
        );
    }

    #[test]
    fn blocked_push_resumes_when_device_drains() {
        let (producer, mut consumer) = playback_buffer(1);
        producer.push(AudioChunk::Samples(vec![1.0])).unwrap();

        let worker = std::thread::spawn(move || producer.push(AudioChunk::EndOfUtterance));
        std::thread::sleep(Duration::from_millis(20));

        let (block, stop) = consumer.pull_exact(1);
        assert_eq!(block, vec![1.0]);
        assert!(!stop);

        worker.join().unwrap().unwrap();
        assert!(consumer.pull_exact(1).1);
    }

    #[tokio::test]
    async fn monitor_wait_for_times_out_without_playback() {
        let (_producer, consumer) = playback_buffer(2);
        let monitor = consumer.monitor();
        assert!(!monitor.wait_for(1, Duration::from_millis(50)).await);
        assert!(monitor.wait_for(0, Duration::from_millis(50)).await);
    }

    #[test]
    #[should_panic(expected = "playback buffer capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = playback_buffer(0);
    }
}
