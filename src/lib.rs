//! Voice-driven conversational assistant.
//!
//! Microphone audio is transcribed, checked for a wake phrase, answered by a
//! tool-calling language model, and spoken back sentence by sentence while
//! the reply is still streaming.
//!
//! ```text
//! microphone → stt → conversation → llm::ToolCallLoop → tts::SentenceSplitter
//!            → tts::SynthesisWorker → audio::PlaybackBuffer → speaker
//! ```

pub mod app;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod stt;
pub mod tools;
pub mod tts;
