//! The conversation: wake phrase, active turns, and what the display sees.
//!
//! # Architecture
//!
//! ```text
//! SpeechCapture ──utterances──▶ ConversationController::run()  ← tokio task
//! typed input (mpsc) ─────────▶        │
//!                                      ├─ SttEngine (spawn_blocking)
//!                                      ├─ ToolCallLoop ─▶ SentenceSplitter ─▶ SynthesisWorker
//!                                      └─ NotificationSink ──UiEvent──▶ display
//! ```
//!
//! Only the controller changes [`ConversationState`] or the
//! [`ConversationHistory`]; everything else learns about them through the
//! [`NotificationSink`].

pub mod controller;
pub mod notify;
pub mod state;
pub mod wake;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{
    Collaborators, ControllerSettings, ConversationController, STATUS_LISTENING,
    STATUS_PROCESSING,
};
pub use notify::{ChannelSink, NotificationSink, UiEvent};
pub use state::{
    ConversationHistory, ConversationState, ConversationTurn, Role, DEFAULT_HISTORY_CAPACITY,
};
pub use wake::{extract_query, is_quit, is_wake_word, WakePhrase};
