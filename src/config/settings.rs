//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! needs to name the values it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable consulted when `[model].api_key` is not set.
pub const API_KEY_ENV: &str = "VOICE_ASSISTANT_API_KEY";

// ---------------------------------------------------------------------------
// AssistantConfig
// ---------------------------------------------------------------------------

/// Conversation behaviour: wake phrase, quit words, history size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Keyword that must appear in an utterance to open a turn.
    pub wake_word: String,
    /// Utterances that end the active turn (compared after normalisation).
    pub quit_words: Vec<String>,
    /// Spoken when a turn opens without a pending query.
    pub greeting: String,
    /// Maximum number of turns kept in memory; the oldest is evicted.
    pub history_capacity: usize,
    /// Upper bound on model exchanges per user query.
    pub max_tool_rounds: usize,
    /// Remainders after the wake word shorter than this are discarded.
    pub min_query_chars: usize,
    /// Upper bound on how long the controller waits for playback to drain.
    pub playback_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            wake_word: "Tars".into(),
            quit_words: vec!["quit".into(), "exit".into()],
            greeting: "Hello User!".into(),
            history_capacity: 100,
            max_tool_rounds: 5,
            min_query_chars: 3,
            playback_timeout_secs: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Settings for the tool-calling language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat-completions API.
    pub base_url: String,
    /// API key: `None` falls back to [`API_KEY_ENV`], then to no auth.
    pub api_key: Option<String>,
    /// Model identifier sent to the API.
    pub model: String,
    /// System instruction placed at the head of the chat.
    pub system_instruction: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Seconds to wait for the response headers of one model round.
    pub timeout_secs: u64,
    /// Chat messages kept after the system instruction.  Older exchanges
    /// are dropped a whole user query at a time.
    pub max_history_messages: usize,
    /// JSON file listing MCP tool servers.  Relative paths resolve against
    /// the config directory; `None` means "no tools".
    pub servers_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:7b".into(),
            system_instruction: "You are Tars, a concise voice assistant. \
                Answer in short spoken sentences without markdown."
                .into(),
            temperature: 0.7,
            timeout_secs: 60,
            max_history_messages: 40,
            servers_file: Some("servers.json".into()),
        }
    }
}

impl ModelConfig {
    /// The configured key, or the value of [`API_KEY_ENV`] when unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Settings for the Whisper STT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// GGML model file stem (e.g. `"ggml-base.en"`).
    pub model: String,
    /// Speech language as an ISO-639-1 code, or `"auto"`.
    pub language: String,
    /// Attempt GPU-accelerated inference when available.
    pub use_gpu: bool,
    /// Beam width; `1` selects greedy decoding.
    pub beam_size: i32,
    /// Extra words to bias recognition towards.  The wake word is always
    /// added by the controller.
    pub hint_words: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "ggml-base.en".into(),
            language: "en".into(),
            use_gpu: false,
            beam_size: 5,
            hint_words: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture, utterance detection and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of synthesized speech and of the output stream.
    pub output_sample_rate: u32,
    /// Requested hardware buffer size in frames.
    pub frames_per_buffer: u32,
    /// Maximum number of queued audio items before the synthesis worker
    /// blocks.
    pub playback_queue_capacity: usize,
    /// Seconds of ambient audio sampled once at startup.
    pub calibration_secs: f32,
    /// RMS floor above which a frame counts as speech.
    pub energy_threshold: f32,
    /// Raise the threshold to the calibrated ambient level when louder.
    pub dynamic_energy: bool,
    /// Seconds of silence that end an utterance.
    pub pause_secs: f32,
    /// Utterances with less speech than this are dropped.
    pub min_utterance_secs: f32,
    /// Utterances are cut off at this length.
    pub max_utterance_secs: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 24_000,
            frames_per_buffer: 1024,
            playback_queue_capacity: 50,
            calibration_secs: 3.0,
            energy_threshold: 0.02,
            dynamic_energy: true,
            pause_secs: 0.8,
            min_utterance_secs: 0.3,
            max_utterance_secs: 30.0,
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Settings for the speech-synthesis server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Base URL of an OpenAI-compatible `/v1/audio/speech` endpoint.
    pub base_url: String,
    /// API key: `None` for local servers.
    pub api_key: Option<String>,
    /// Synthesis model identifier.
    pub model: String,
    /// Voice identifier.
    pub voice: String,
    /// Seconds to wait for one sentence to be synthesized.
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".into(),
            api_key: None,
            model: "kokoro".into(),
            voice: "af_heart".into(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// Transcript window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Keep the window floating above all other windows.
    pub always_on_top: bool,
    /// Initial inner size `(width, height)` in points.
    pub window_size: (f32, f32),
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            always_on_top: false,
            window_size: (800.0, 600.0),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_assistant::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert_eq!(config.assistant.max_tool_rounds, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub model: ModelConfig,
    pub stt: SttConfig,
    pub audio: AudioConfig,
    pub synthesis: SynthesisConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Words the transcription engine is biased towards: the wake word
    /// followed by any configured hint words.
    pub fn hint_words(&self) -> Vec<String> {
        let mut words = vec![self.assistant.wake_word.clone()];
        for word in &self.stt.hint_words {
            if !words.iter().any(|w| w.eq_ignore_ascii_case(word)) {
                words.push(word.clone());
            }
        }
        words
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
