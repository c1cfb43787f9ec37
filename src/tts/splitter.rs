//! Sentence splitting over a streamed model reply.
//!
//! [`SentenceSplitter`] receives text fragments as the model produces them and
//! hands back a sentence as soon as one is complete, so synthesis of the first
//! sentence can start while the model is still writing the second.
//!
//! A sentence is complete when the accumulated text, ignoring trailing
//! whitespace, ends in `.`, `!` or `?`.  Sentences are returned verbatim
//! (surrounding whitespace included), so concatenating every sentence and the
//! final remainder reproduces the input exactly.
//!
//! ```rust
//! use voice_assistant::tts::SentenceSplitter;
//!
//! let mut splitter = SentenceSplitter::new();
//! assert_eq!(splitter.push("Hello"), None);
//! assert_eq!(splitter.push(" there. How"), None);
//! assert_eq!(splitter.push(" are you?"), Some("Hello there. How are you?".to_string()));
//! assert_eq!(splitter.push(" Bye"), None);
//!
//! let rest = splitter.finish();
//! assert_eq!(rest.remainder.as_deref(), Some(" Bye"));
//! assert_eq!(rest.full_text, "Hello there. How are you? Bye");
//! ```

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Accumulates fragments until a sentence terminator is seen.
#[derive(Debug, Default, Clone)]
pub struct SentenceSplitter {
    current: String,
    full_text: String,
}

/// What is left once the fragment stream is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRemainder {
    /// Unterminated trailing text, if any.
    pub remainder: Option<String>,
    /// Every fragment pushed, concatenated.
    pub full_text: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment`.  Returns the accumulated sentence when the text now
    /// ends in a terminator.
    ///
    /// Only the end of the accumulated text is inspected, so a fragment that
    /// carries a terminator in its middle (`"one. two"`) is held until the
    /// next terminator arrives.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.full_text.push_str(fragment);
        self.current.push_str(fragment);

        let ends_sentence = self
            .current
            .trim_end()
            .chars()
            .next_back()
            .is_some_and(|c| TERMINATORS.contains(&c));

        if ends_sentence {
            Some(std::mem::take(&mut self.current))
        } else {
            None
        }
    }

    /// Text received since the last emitted sentence.
    pub fn pending(&self) -> &str {
        &self.current
    }

    /// End of stream: release the remainder and the full reply text.
    pub fn finish(self) -> SplitRemainder {
        SplitRemainder {
            remainder: (!self.current.is_empty()).then_some(self.current),
            full_text: self.full_text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
