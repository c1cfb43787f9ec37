//! Wake-phrase and quit-word matching on transcripts.

use regex::{Regex, RegexBuilder};

/// Trailing characters ignored when comparing against quit words.
const QUIT_PUNCTUATION: &[char] = &['.', '!', '?', ','];

/// A wake word with its matcher compiled once.
#[derive(Debug, Clone)]
pub struct WakePhrase {
    word: String,
    /// `None` for a blank or unusable wake word, which never matches.
    pattern: Option<Regex>,
}

impl WakePhrase {
    pub fn new(word: &str) -> Self {
        let word = word.trim();
        let pattern = if word.is_empty() {
            None
        } else {
            RegexBuilder::new(&format!(r"\b{}\b(.*)", regex::escape(word)))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .map_err(|e| log::warn!("wake: invalid wake word {word:?}: {e}"))
                .ok()
        };
        Self {
            word: word.to_string(),
            pattern,
        }
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    /// The query that follows the wake word in `text`.
    ///
    /// The wake word must appear as a whole word, in any case.  The
    /// remainder is trimmed of surrounding whitespace and leading
    /// punctuation; remainders shorter than `min_chars` characters are
    /// treated as noise.
    pub fn extract(&self, text: &str, min_chars: usize) -> Option<String> {
        let remainder = self.pattern.as_ref()?.captures(text)?.get(1)?.as_str();
        let query = remainder
            .trim_start_matches(|c: char| c.is_whitespace() || QUIT_PUNCTUATION.contains(&c))
            .trim_end();

        if query.chars().count() < min_chars {
            log::debug!("wake: ignoring short remainder {query:?}");
            return None;
        }
        Some(query.to_string())
    }

    /// Returns `true` when `text` is the wake word on its own.
    pub fn is_alone_in(&self, text: &str) -> bool {
        is_wake_word(text, &self.word)
    }
}

/// One-off form of [`WakePhrase::extract`].
///
/// ```
/// use voice_assistant::conversation::extract_query;
///
/// assert_eq!(
///     extract_query("hey Tars what time is it", "Tars", 3).as_deref(),
///     Some("what time is it")
/// );
/// assert_eq!(extract_query("Tars ok", "Tars", 3), None);
/// assert_eq!(extract_query("good morning", "Tars", 3), None);
/// ```
pub fn extract_query(text: &str, wake_word: &str, min_chars: usize) -> Option<String> {
    WakePhrase::new(wake_word).extract(text, min_chars)
}

/// Returns `true` when `text` is the wake word on its own, e.g. typed into
/// the input box to open a turn without a question.
pub fn is_wake_word(text: &str, wake_word: &str) -> bool {
    normalize(text) == normalize(wake_word)
}

/// Returns `true` when `text` is one of `quit_words` after normalisation.
///
/// ```
/// use voice_assistant::conversation::is_quit;
///
/// let words = vec!["quit".to_string(), "exit".to_string()];
/// assert!(is_quit(" Exit. ", &words));
/// assert!(!is_quit("exit the room", &words));
/// ```
pub fn is_quit(text: &str, quit_words: &[String]) -> bool {
    let text = normalize(text);
    !text.is_empty() && quit_words.iter().any(|w| normalize(w) == text)
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(QUIT_PUNCTUATION)
        .trim()
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
