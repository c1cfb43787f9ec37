//! Audio in and out.
//!
//! # Input
//!
//! ```text
//! Microphone → cpal callback → InputChunk (bounded crossbeam channel)
//!           → downmix → Resampler (16 kHz) → UtteranceSegmenter → Utterance
//! ```
//!
//! # Output
//!
//! ```text
//! SynthesisWorker → PlaybackProducer ═ PlaybackBuffer ═ PlaybackConsumer
//!                → DeviceCallback (cpal output thread, 24 kHz)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voice_assistant::audio::{playback_buffer, AudioChunk, AudioOutput};
//!
//! let (producer, consumer) = playback_buffer(50);
//! let output = AudioOutput::new(24_000, 1024).unwrap();
//! let _handle = output.start(consumer).unwrap(); // drop handle → stops stream
//!
//! producer.push(AudioChunk::Samples(vec![0.0; 24_000])).unwrap();
//! producer.push(AudioChunk::EndOfUtterance).unwrap();
//! ```

pub mod capture;
pub mod listener;
pub mod output;
pub mod playback;
pub mod resample;
pub mod vad;

pub use capture::{AudioCapture, CaptureError, InputChunk, StreamHandle};
pub use listener::{BackgroundListener, Microphone, SpeechCapture, Utterance, UtteranceHandler};
pub use output::{AudioOutput, DeviceCallback, OutputError, OutputHandle};
pub use playback::{
    playback_buffer, AudioChunk, PlaybackConsumer, PlaybackError, PlaybackMonitor,
    PlaybackProducer,
};
pub use resample::{downmix, Resampler, TRANSCRIBE_SAMPLE_RATE};
pub use vad::{SegmenterConfig, UtteranceSegmenter};
