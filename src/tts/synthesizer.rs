//! Text-to-speech collaborator.
//!
//! [`Synthesizer`] turns one sentence into one or more blocks of 24 kHz mono
//! `f32` samples.  It is synchronous: the [`SynthesisWorker`] calls it from a
//! dedicated thread, never from the async executor or the audio callback.
//!
//! [`HttpSynthesizer`] speaks the OpenAI-compatible `/v1/audio/speech` API
//! (Kokoro-FastAPI, OpenAI, …) requesting raw 16-bit little-endian PCM.
//!
//! [`SynthesisWorker`]: crate::tts::SynthesisWorker

use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;

use crate::config::SynthesisConfig;

/// Sample rate of every block a [`Synthesizer`] returns.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis request timed out")]
    Timeout,

    #[error("synthesis server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("synthesis returned no audio")]
    EmptyAudio,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

/// Blocking text-to-speech engine.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// (`Arc<dyn Synthesizer>`) by successive per-utterance workers.
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`.  Blocks are returned in playback order.
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<Vec<f32>>, SynthesisError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Synthesizer>) {}
};

/// Decode signed 16-bit little-endian PCM into `f32` in `[-1.0, 1.0)`.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
        .collect()
}

// ---------------------------------------------------------------------------
// HttpSynthesizer
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible speech endpoint.
///
/// Requests are driven on the application's tokio runtime through `handle`
/// while the calling worker thread blocks for the result.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
    handle: Handle,
}

impl HttpSynthesizer {
    pub fn from_config(config: &SynthesisConfig, handle: Handle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
            handle,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/speech", self.config.base_url.trim_end_matches('/'))
    }

    async fn request(&self, text: &str, voice: &str) -> Result<Vec<f32>, SynthesisError> {
        let body = serde_json::json!({
            "model":           self.config.model,
            "input":           text,
            "voice":           voice,
            "response_format": "pcm",
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let samples = pcm16_to_f32(&bytes);
        if samples.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(samples)
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<Vec<f32>>, SynthesisError> {
        let samples = self.handle.block_on(self.request(text, voice))?;
        log::debug!(
            "synthesis: {:.2}s of audio for {:?}",
            samples.len() as f32 / SYNTHESIS_SAMPLE_RATE as f32,
            text
        );
        Ok(vec![samples])
    }
}

// ---------------------------------------------------------------------------
// MockSynthesizer  (test-only)
// ---------------------------------------------------------------------------

/// Returns a fixed waveform per sentence and records what it was asked to say.
#[cfg(test)]
pub struct MockSynthesizer {
    block: Vec<f32>,
    blocks_per_sentence: usize,
    fail: bool,
    spoken: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl MockSynthesizer {
    /// Each sentence becomes `blocks` copies of `block`.
    pub fn new(block: Vec<f32>, blocks: usize) -> Self {
        Self {
            block,
            blocks_per_sentence: blocks,
            fail: false,
            spoken: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new(), 0)
        }
    }

    /// `(text, voice)` pairs in call order.
    pub fn spoken(&self) -> Vec<(String, String)> {
        self.spoken.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<Vec<f32>>, SynthesisError> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if self.fail {
            return Err(SynthesisError::Request("mock failure".into()));
        }
        Ok(vec![self.block.clone(); self.blocks_per_sentence])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
