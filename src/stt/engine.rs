//! Core STT engine trait and implementations.
//!
//! [`SttEngine`] is the transcription collaborator used by the conversation
//! controller.  It is object-safe and `Send + Sync` so it can be held behind
//! an `Arc<dyn SttEngine>` and called from `spawn_blocking`.
//!
//! [`WhisperEngine`] wraps a `whisper_rs::WhisperContext`.  [`MockSttEngine`]
//! (test-only) replays a script of transcripts.

use std::path::Path;

use thiserror::Error;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use crate::stt::transcribe::{hint_prompt, SamplingStrategy, TranscribeParams};

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SttError {
    #[error("Whisper model not found: {0}")]
    ModelNotFound(String),

    #[error("cannot initialise Whisper: {0}")]
    ContextInit(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("utterance contains no audio")]
    EmptyAudio,

    #[error("utterance longer than {} s", MAX_AUDIO_SAMPLES / 16_000)]
    AudioTooLong,
}

// ---------------------------------------------------------------------------
// SttEngine trait
// ---------------------------------------------------------------------------

/// Transcription collaborator.
///
/// # Contract
///
/// - `audio` must be **16 kHz, mono, f32** PCM samples.
/// - `hint_words` bias recognition towards names the model would otherwise
///   mishear (the wake word first).  Engines may ignore them.
/// - Silence or unintelligible audio is `Ok` with an empty string.
pub trait SttEngine: Send + Sync {
    fn transcribe(&self, audio: &[f32], hint_words: &[String]) -> Result<String, SttError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SttEngine>) {}
};

/// Whisper decodes poorly below one second, so shorter audio is padded.
const MIN_AUDIO_SAMPLES: usize = 16_000;
/// One minute at 16 kHz.
const MAX_AUDIO_SAMPLES: usize = 960_000;

fn check_length(audio: &[f32]) -> Result<(), SttError> {
    if audio.is_empty() {
        return Err(SttError::EmptyAudio);
    }
    if audio.len() > MAX_AUDIO_SAMPLES {
        return Err(SttError::AudioTooLong);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

/// Whisper over a GGML model file.
///
/// A new `WhisperState` is created for every call so the engine can be
/// shared across threads without locking.
pub struct WhisperEngine {
    ctx: WhisperContext,
    params: TranscribeParams,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the model
// weights are read-only after loading.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    /// Load a GGML model from `model_path`.
    pub fn load(model_path: impl AsRef<Path>, params: TranscribeParams) -> Result<Self, SttError> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(SttError::ModelNotFound(path.display().to_string()));
        }

        let path_str = path.to_str().ok_or_else(|| {
            SttError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu = params.use_gpu;
        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        log::info!("stt: loaded {} ({:?})", path.display(), params.strategy);
        Ok(Self { ctx, params })
    }
}

impl SttEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32], hint_words: &[String]) -> Result<String, SttError> {
        check_length(audio)?;

        let padded;
        let audio = if audio.len() < MIN_AUDIO_SAMPLES {
            let mut buf = audio.to_vec();
            buf.resize(MIN_AUDIO_SAMPLES, 0.0);
            padded = buf;
            &padded[..]
        } else {
            audio
        };

        use whisper_rs::SamplingStrategy as WS;
        let ws = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                WS::BeamSearch { beam_size, patience }
            }
        };

        // Borrowed by `fp` until `state.full` returns.
        let prompt = hint_prompt(hint_words);

        let mut fp = FullParams::new(ws);
        let lang: Option<&str> = if self.params.language == "auto" {
            None
        } else {
            Some(self.params.language.as_str())
        };
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);
        if let Some(prompt) = prompt.as_deref() {
            fp.set_initial_prompt(prompt);
        }
        if self.params.suppress_progress {
            fp.set_print_progress(false);
            fp.set_print_realtime(false);
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        let started = std::time::Instant::now();
        state
            .full(fp, audio)
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let text = (0..n_segments)
            .map(|i| state.full_get_segment_text(i))
            .collect::<Result<String, _>>()
            .map_err(|e| SttError::Transcription(e.to_string()))?
            .trim()
            .to_string();
        log::debug!(
            "stt: {:.1}s of audio in {} ms: {text:?}",
            audio.len() as f32 / 16_000.0,
            started.elapsed().as_millis()
        );
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// MockSttEngine  (test-only)
// ---------------------------------------------------------------------------

/// Replays scripted transcripts in order, then returns empty strings.
#[cfg(test)]
pub struct MockSttEngine {
    script: std::sync::Mutex<std::collections::VecDeque<Result<String, SttError>>>,
    hints: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
impl MockSttEngine {
    /// A mock whose first call returns `Ok(text)`.
    pub fn ok(text: impl Into<String>) -> Self {
        Self::script([Ok(text.into())])
    }

    pub fn err(error: SttError) -> Self {
        Self::script([Err(error)])
    }

    pub fn script(responses: impl IntoIterator<Item = Result<String, SttError>>) -> Self {
        Self {
            script: std::sync::Mutex::new(responses.into_iter().collect()),
            hints: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Hint words passed to each call so far.
    pub fn hints_seen(&self) -> Vec<Vec<String>> {
        self.hints.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[cfg(test)]
impl SttEngine for MockSttEngine {
    fn transcribe(&self, audio: &[f32], hint_words: &[String]) -> Result<String, SttError> {
        check_length(audio)?;
        self.hints.lock().unwrap().push(hint_words.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
