//! Speaking a streamed reply.
//!
//! ```text
//! model tokens ─▶ SentenceSplitter ─sentence─▶ SynthesisWorker ─▶ PlaybackBuffer
//!                                               (Synthesizer)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_assistant::audio::playback_buffer;
//! use voice_assistant::config::SynthesisConfig;
//! use voice_assistant::tts::{HttpSynthesizer, SentenceSplitter, SynthesisWorker};
//!
//! # async fn demo() {
//! let (producer, _consumer) = playback_buffer(50);
//! let synth = Arc::new(HttpSynthesizer::from_config(
//!     &SynthesisConfig::default(),
//!     tokio::runtime::Handle::current(),
//! ));
//! let worker = SynthesisWorker::spawn(synth, "af_heart", producer).unwrap();
//!
//! let mut splitter = SentenceSplitter::new();
//! for token in ["Hello", " there.", " Bye"] {
//!     if let Some(sentence) = splitter.push(token) {
//!         worker.speak(sentence);
//!     }
//! }
//! if let Some(rest) = splitter.finish().remainder {
//!     worker.speak(rest);
//! }
//! worker.finish().await;
//! # }
//! ```

pub mod splitter;
pub mod synthesizer;
pub mod worker;

pub use splitter::{SentenceSplitter, SplitRemainder};
pub use synthesizer::{
    pcm16_to_f32, HttpSynthesizer, SynthesisError, Synthesizer, SYNTHESIS_SAMPLE_RATE,
};
pub use worker::{SynthesisWorker, WorkerReport};

#[cfg(test)]
pub use synthesizer::MockSynthesizer;
