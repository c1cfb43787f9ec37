//! Transcription parameter types.
//!
//! [`TranscribeParams`] carries every setting that controls a Whisper
//! inference run; it is built once from [`SttConfig`] at startup.

use crate::config::SttConfig;

// ---------------------------------------------------------------------------
// SamplingStrategy
// ---------------------------------------------------------------------------

/// Mirrors `whisper_rs::SamplingStrategy` but is owned and `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    Greedy {
        best_of: i32,
    },
    BeamSearch {
        beam_size: i32,
        /// Beam-search patience factor (≥1.0 = standard beam search).
        patience: f32,
    },
}

impl SamplingStrategy {
    /// Beam search for `beam_size > 1`, greedy otherwise.
    pub fn from_beam_size(beam_size: i32) -> Self {
        if beam_size > 1 {
            Self::BeamSearch {
                beam_size,
                patience: 1.0,
            }
        } else {
            Self::Greedy { best_of: 1 }
        }
    }
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::from_beam_size(5)
    }
}

// ---------------------------------------------------------------------------
// TranscribeParams
// ---------------------------------------------------------------------------

/// All parameters for Whisper transcription.
///
/// ```
/// use voice_assistant::stt::{SamplingStrategy, TranscribeParams};
///
/// let params = TranscribeParams {
///     strategy: SamplingStrategy::Greedy { best_of: 1 },
///     ..TranscribeParams::default()
/// };
/// assert_eq!(params.language, "en");
/// ```
#[derive(Debug, Clone)]
pub struct TranscribeParams {
    /// ISO-639-1 language code, or `"auto"` to let Whisper detect it.
    pub language: String,
    pub strategy: SamplingStrategy,
    /// Number of CPU threads handed to Whisper, capped at 8.
    pub n_threads: i32,
    pub use_gpu: bool,
    /// Suppress Whisper's progress output to stderr.
    pub suppress_progress: bool,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self {
            language: "en".into(),
            strategy: SamplingStrategy::default(),
            n_threads: optimal_threads(),
            use_gpu: false,
            suppress_progress: true,
        }
    }
}

impl From<&SttConfig> for TranscribeParams {
    fn from(cfg: &SttConfig) -> Self {
        Self {
            language: cfg.language.clone(),
            strategy: SamplingStrategy::from_beam_size(cfg.beam_size),
            use_gpu: cfg.use_gpu,
            ..Self::default()
        }
    }
}

pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

/// Whisper initial prompt that biases decoding towards `hint_words`.
///
/// Returns `None` when there is nothing to hint.
pub fn hint_prompt(hint_words: &[String]) -> Option<String> {
    let words: Vec<&str> = hint_words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(format!("{}.", words.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_size_one_is_greedy() {
        assert_eq!(
            SamplingStrategy::from_beam_size(1),
            SamplingStrategy::Greedy { best_of: 1 }
        );
        assert!(matches!(
            SamplingStrategy::from_beam_size(5),
            SamplingStrategy::BeamSearch { beam_size: 5, .. }
        ));
    }

    #[test]
    fn params_follow_config() {
        let cfg = SttConfig {
            language: "de".into(),
            beam_size: 1,
            use_gpu: true,
            ..SttConfig::default()
        };
        let params = TranscribeParams::from(&cfg);
        assert_eq!(params.language, "de");
        assert_eq!(params.strategy, SamplingStrategy::Greedy { best_of: 1 });
        assert!(params.use_gpu);
    }

    #[test]
    fn optimal_threads_is_positive_and_at_most_8() {
        let t = optimal_threads();
        assert!((1..=8).contains(&t));
    }

    #[test]
    fn hint_prompt_joins_words() {
        let hints = vec!["Tars".to_string(), " ".to_string(), "Anki".to_string()];
        assert_eq!(hint_prompt(&hints).as_deref(), Some("Tars, Anki."));
        assert_eq!(hint_prompt(&[]), None);
    }
}
