//! Speech-to-text.
//!
//! ```text
//! Utterance (16 kHz mono) ──▶ SttEngine::transcribe(audio, hint_words) ──▶ text
//!                                  │
//!                                  └── WhisperEngine (whisper-rs, GGML model)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_assistant::stt::{SttEngine, TranscribeParams, WhisperEngine};
//!
//! let engine = WhisperEngine::load("models/ggml-base.en.bin", TranscribeParams::default())
//!     .expect("model not found");
//!
//! let audio: Vec<f32> = vec![0.0; 16_000]; // 1 s of silence
//! let text = engine.transcribe(&audio, &["Tars".to_string()]).unwrap();
//! println!("{text}");
//! ```

pub mod engine;
pub mod transcribe;

pub use engine::{SttEngine, SttError, WhisperEngine};
pub use transcribe::{hint_prompt, SamplingStrategy, TranscribeParams};

#[cfg(test)]
pub use engine::MockSttEngine;
