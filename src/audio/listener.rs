//! Utterance-level microphone access.
//!
//! [`SpeechCapture`] is the seam between the conversation controller and the
//! microphone: it can calibrate against ambient noise, block until the next
//! utterance, or deliver utterances to a callback from a background thread.
//! [`Microphone`] implements it on top of [`AudioCapture`] and
//! [`UtteranceSegmenter`].
//!
//! Only one consumer reads the microphone at a time.  The controller stops the
//! background listener before calling [`SpeechCapture::listen`] directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::audio::capture::{AudioCapture, CaptureError, InputChunk, StreamHandle, INPUT_QUEUE_CAPACITY};
use crate::audio::resample::{downmix, Resampler, TRANSCRIBE_SAMPLE_RATE};
use crate::audio::vad::{SegmenterConfig, UtteranceSegmenter};

/// How often the background thread checks its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Utterance
// ---------------------------------------------------------------------------

/// One captured unit of speech: 16 kHz mono `f32`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
}

impl Utterance {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.samples.len() as f32 / TRANSCRIBE_SAMPLE_RATE as f32)
    }
}

/// Callback invoked once per utterance by a background listener.
pub type UtteranceHandler = Box<dyn FnMut(Utterance) + Send>;

// ---------------------------------------------------------------------------
// SpeechCapture
// ---------------------------------------------------------------------------

/// Microphone collaborator used by the conversation controller.
///
/// All methods may block and must be called off the async executor
/// (`tokio::task::spawn_blocking`).
pub trait SpeechCapture: Send + Sync {
    /// Measure ambient noise for `duration` and adapt the speech threshold.
    fn calibrate(&self, duration: Duration) -> Result<(), CaptureError>;

    /// Block until the next complete utterance.
    fn listen(&self) -> Result<Utterance, CaptureError>;

    /// Deliver every utterance to `on_utterance` from a background thread
    /// until the returned handle is stopped.
    fn listen_in_background(
        &self,
        on_utterance: UtteranceHandler,
    ) -> Result<BackgroundListener, CaptureError>;
}

// ---------------------------------------------------------------------------
// BackgroundListener
// ---------------------------------------------------------------------------

/// Cancellable handle to a running background listener.
///
/// Dropping the handle asks the thread to stop without waiting for it.
pub struct BackgroundListener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundListener {
    /// Wrap a thread that polls `stop`.
    pub fn new(stop: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Signal the thread and wait for it to exit.  No callback runs after
    /// this returns.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("capture: background listener panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for BackgroundListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

struct MicState {
    rx: Receiver<InputChunk>,
    segmenter: Mutex<UtteranceSegmenter>,
}

impl MicState {
    fn segmenter(&self) -> MutexGuard<'_, UtteranceSegmenter> {
        self.segmenter.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Throw away audio captured while nobody was listening.
    fn discard_stale(&self) {
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            log::debug!("capture: discarded {dropped} stale chunks");
        }
    }

    fn to_transcription_audio(resampler: &mut Option<Resampler>, chunk: &InputChunk) -> Vec<f32> {
        let mono = downmix(&chunk.samples, chunk.channels);
        resampler
            .get_or_insert_with(|| Resampler::to_transcription_rate(chunk.sample_rate))
            .process(&mono)
    }
}

/// Default microphone, segmented into utterances.
///
/// Cloning shares the underlying stream.
#[derive(Clone)]
pub struct Microphone {
    state: Arc<MicState>,
}

impl Microphone {
    /// Open the default input device.  The returned [`StreamHandle`] must be
    /// kept alive for as long as the microphone is used.
    pub fn open(config: SegmenterConfig) -> Result<(Self, StreamHandle), CaptureError> {
        let capture = AudioCapture::new()?;
        let (tx, rx) = crossbeam_channel::bounded(INPUT_QUEUE_CAPACITY);
        let handle = capture.start(tx)?;
        Ok((Self::from_receiver(rx, config), handle))
    }

    /// Build a microphone over an existing chunk stream.
    pub fn from_receiver(rx: Receiver<InputChunk>, config: SegmenterConfig) -> Self {
        Self {
            state: Arc::new(MicState {
                rx,
                segmenter: Mutex::new(UtteranceSegmenter::new(config)),
            }),
        }
    }

    /// Current speech threshold.
    pub fn threshold(&self) -> f32 {
        self.state.segmenter().threshold()
    }
}

impl SpeechCapture for Microphone {
    fn calibrate(&self, duration: Duration) -> Result<(), CaptureError> {
        let state = &self.state;
        state.discard_stale();

        let deadline = Instant::now() + duration;
        let mut resampler = None;
        let mut ambient = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match state.rx.recv_timeout(remaining) {
                Ok(chunk) => ambient.extend(MicState::to_transcription_audio(&mut resampler, &chunk)),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }

        state.segmenter().calibrate(&ambient);
        Ok(())
    }

    fn listen(&self) -> Result<Utterance, CaptureError> {
        let state = &self.state;
        state.discard_stale();

        let mut segmenter = state.segmenter();
        segmenter.reset();
        let mut resampler = None;

        loop {
            let chunk = state.rx.recv().map_err(|_| CaptureError::Disconnected)?;
            let audio = MicState::to_transcription_audio(&mut resampler, &chunk);
            if let Some(samples) = segmenter.push(&audio).into_iter().next() {
                return Ok(Utterance::new(samples));
            }
        }
    }

    fn listen_in_background(
        &self,
        mut on_utterance: UtteranceHandler,
    ) -> Result<BackgroundListener, CaptureError> {
        let state = Arc::clone(&self.state);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("wake-listener".into())
            .spawn(move || {
                state.discard_stale();
                state.segmenter().reset();
                let mut resampler = None;

                while !stop_flag.load(Ordering::SeqCst) {
                    let chunk = match state.rx.recv_timeout(POLL_INTERVAL) {
                        Ok(chunk) => chunk,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            log::warn!("capture: microphone stream ended");
                            break;
                        }
                    };
                    let audio = MicState::to_transcription_audio(&mut resampler, &chunk);
                    let finished = state.segmenter().push(&audio);
                    for samples in finished {
                        if stop_flag.load(Ordering::SeqCst) {
                            return;
                        }
                        on_utterance(Utterance::new(samples));
                    }
                }
                log::debug!("capture: background listener stopped");
            })?;

        Ok(BackgroundListener::new(stop, thread))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Sender;

    fn chunk(amp: f32, len: usize) -> InputChunk {
        InputChunk {
            samples: vec![amp; len],
            sample_rate: 48_000,
            channels: 2,
        }
    }

    /// Feed `secs` of constant stereo 48 kHz audio in 10 ms chunks.
    fn feed(tx: &Sender<InputChunk>, amp: f32, secs: f32) {
        let chunks = (secs * 100.0) as usize;
        for _ in 0..chunks {
            tx.send(chunk(amp, 960)).unwrap();
        }
    }

    fn mic() -> (Sender<InputChunk>, Microphone) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Microphone::from_receiver(rx, SegmenterConfig::default()))
    }

    #[test]
    fn utterance_duration() {
        assert_eq!(Utterance::new(vec![0.0; 8_000]).duration(), Duration::from_millis(500));
    }

    #[test]
    fn listen_returns_next_utterance() {
        let (tx, mic) = mic();
        let feeder = std::thread::spawn(move || {
            // Give `listen` time to discard the (empty) backlog first.
            std::thread::sleep(Duration::from_millis(50));
            feed(&tx, 0.3, 0.6);
            feed(&tx, 0.0, 1.0);
            tx
        });

        let utterance = mic.listen().unwrap();
        assert!(utterance.duration() >= Duration::from_millis(600));
        drop(feeder.join().unwrap());
    }

    #[test]
    fn listen_discards_stale_audio() {
        let (tx, mic) = mic();
        feed(&tx, 0.3, 0.6);
        feed(&tx, 0.0, 1.0);
        drop(tx);
        // The only utterance was queued before `listen`, then the stream ends.
        assert!(matches!(mic.listen(), Err(CaptureError::Disconnected)));
    }

    #[test]
    fn calibrate_raises_threshold() {
        let (tx, mic) = mic();
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feed(&tx, 0.1, 0.2);
            tx
        });
        mic.calibrate(Duration::from_millis(300)).unwrap();
        assert!(mic.threshold() > 0.1);
        drop(feeder.join().unwrap());
    }

    #[test]
    fn calibrate_on_closed_stream_fails() {
        let (tx, mic) = mic();
        drop(tx);
        assert!(matches!(
            mic.calibrate(Duration::from_millis(50)),
            Err(CaptureError::Disconnected)
        ));
    }

    #[test]
    fn background_listener_delivers_until_stopped() {
        let (tx, mic) = mic();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();

        let listener = mic
            .listen_in_background(Box::new(move |u| {
                let _ = seen_tx.send(u);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        feed(&tx, 0.3, 0.6);
        feed(&tx, 0.0, 1.0);
        let first = seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!first.samples.is_empty());

        listener.stop();
        feed(&tx, 0.3, 0.6);
        feed(&tx, 0.0, 1.0);
        assert!(seen_rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn background_listener_exits_when_stream_ends() {
        let (tx, mic) = mic();
        let listener = mic.listen_in_background(Box::new(|_| {})).unwrap();
        drop(tx);
        std::thread::sleep(Duration::from_millis(300));
        assert!(!listener.is_running());
        listener.stop();
    }
}
