//! Conversation controller: drives wake listening, active turns and replies.
//!
//! [`ConversationController`] owns the [`ConversationState`] and the turn
//! history.  It reacts to utterances from the [`SpeechCapture`] collaborator
//! and to queries typed into the display, received over a
//! `tokio::sync::mpsc` channel.
//!
//! # Flow
//!
//! ```text
//! Dormant
//!   └─▶ spawn_blocking(capture.calibrate)                   [WakeListening]
//!
//! WakeListening   (background listener running)
//!   ├─ typed text      → ActiveTurn (wake word alone → greeting first)
//!   └─ utterance       → spawn_blocking(stt.transcribe) → extract_query
//!         ├─ no query  → stay
//!         └─ query     → stop listener                       [ActiveTurn]
//!
//! ActiveTurn
//!   loop:
//!     query ← typed input, else spawn_blocking(capture.listen → stt.transcribe)
//!     quit word → start background listener                  [WakeListening]
//!     otherwise → ToolCallLoop ─tokens─▶ SentenceSplitter ─▶ SynthesisWorker
//!                 wait for PlaybackMonitor, "Listening"
//! ```
//!
//! Errors while handling one utterance are logged and the utterance is
//! dropped; the state does not change.  The controller stops when the typed
//! input channel closes or the microphone stream ends.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::audio::{
    BackgroundListener, CaptureError, PlaybackMonitor, PlaybackProducer, SpeechCapture, Utterance,
};
use crate::config::AppConfig;
use crate::llm::{ModelError, TokenStream, ToolCallLoop};
use crate::stt::SttEngine;
use crate::tts::{SentenceSplitter, SynthesisWorker, Synthesizer};

use super::notify::NotificationSink;
use super::state::{ConversationHistory, ConversationState, ConversationTurn, Role};
use super::wake::{is_quit, WakePhrase};

pub const STATUS_PROCESSING: &str = "Processing";
pub const STATUS_LISTENING: &str = "Listening";

// ---------------------------------------------------------------------------
// ControllerSettings
// ---------------------------------------------------------------------------

/// Conversation parameters, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub wake: WakePhrase,
    pub quit_words: Vec<String>,
    pub greeting: String,
    pub voice: String,
    /// Passed to every transcription.
    pub hint_words: Vec<String>,
    pub min_query_chars: usize,
    pub history_capacity: usize,
    pub calibration: Duration,
    /// Longest wait for a reply to finish playing before listening again.
    pub playback_timeout: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            wake: WakePhrase::new(&config.assistant.wake_word),
            quit_words: config.assistant.quit_words.clone(),
            greeting: config.assistant.greeting.clone(),
            voice: config.synthesis.voice.clone(),
            hint_words: config.hint_words(),
            min_query_chars: config.assistant.min_query_chars,
            history_capacity: config.assistant.history_capacity,
            calibration: Duration::from_secs_f32(config.audio.calibration_secs.max(0.0)),
            playback_timeout: Duration::from_secs(config.assistant.playback_timeout_secs),
        }
    }

    /// Prompt shown while waiting for the wake phrase.
    pub fn wake_prompt(&self) -> String {
        format!("Say {} to start conversation", self.wake.word())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Everything the controller talks to.
pub struct Collaborators {
    pub capture: Arc<dyn SpeechCapture>,
    pub stt: Arc<dyn SttEngine>,
    pub tool_loop: ToolCallLoop,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub playback: PlaybackProducer,
    /// Must observe the consumer fed by `playback`.
    pub monitor: PlaybackMonitor,
    pub sink: Arc<dyn NotificationSink>,
}

// ---------------------------------------------------------------------------
// ConversationController
// ---------------------------------------------------------------------------

/// What ended a wait for input.
enum Next {
    /// Open a turn; `None` means greet first.
    Turn(Option<String>),
    Shutdown,
}

/// Result of asking for the next query during an active turn.
enum Query {
    Text(String),
    /// Nothing usable; try again.
    Nothing,
    Shutdown,
}

/// Drives the conversation.
///
/// Create with [`ConversationController::new`], then spawn
/// [`run`](Self::run) as a tokio task.
///
/// ```rust,no_run
/// # use voice_assistant::conversation::{Collaborators, ConversationController, ControllerSettings};
/// # use voice_assistant::config::AppConfig;
/// # async fn example(collaborators: Collaborators) {
/// let settings = ControllerSettings::from_config(&AppConfig::default());
/// let (input_tx, input_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
///
/// let controller = ConversationController::new(collaborators, settings);
/// tokio::spawn(controller.run(input_rx));
///
/// input_tx.send("Tars".into()).unwrap(); // typed wake word opens a turn
/// # }
/// ```
pub struct ConversationController {
    capture: Arc<dyn SpeechCapture>,
    stt: Arc<dyn SttEngine>,
    tool_loop: ToolCallLoop,
    synthesizer: Arc<dyn Synthesizer>,
    playback: PlaybackProducer,
    monitor: PlaybackMonitor,
    sink: Arc<dyn NotificationSink>,
    settings: ControllerSettings,
    state: ConversationState,
    history: ConversationHistory,
    /// End markers queued so far, counting those played before we started.
    utterances_queued: usize,
}

impl ConversationController {
    pub fn new(collaborators: Collaborators, settings: ControllerSettings) -> Self {
        let Collaborators {
            capture,
            stt,
            tool_loop,
            synthesizer,
            playback,
            monitor,
            sink,
        } = collaborators;

        Self {
            utterances_queued: monitor.completed(),
            history: ConversationHistory::new(settings.history_capacity),
            state: ConversationState::Dormant,
            capture,
            stt,
            tool_loop,
            synthesizer,
            playback,
            monitor,
            sink,
            settings,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `input` closes or the microphone goes away.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<String>) {
        self.calibrate().await;

        loop {
            self.enter(ConversationState::WakeListening);
            let pending = match self.wait_for_wake(&mut input).await {
                Next::Turn(pending) => pending,
                Next::Shutdown => break,
            };

            self.enter(ConversationState::ActiveTurn);
            if !self.active_turn(pending, &mut input).await {
                break;
            }
        }

        log::info!("controller: shutting down");
    }

    // -----------------------------------------------------------------------
    // States
    // -----------------------------------------------------------------------

    async fn calibrate(&mut self) {
        let capture = Arc::clone(&self.capture);
        let duration = self.settings.calibration;
        log::info!("controller: calibrating for {:.1}s", duration.as_secs_f32());

        match tokio::task::spawn_blocking(move || capture.calibrate(duration)).await {
            Ok(Ok(())) => {}
            // Listening still works with the configured threshold.
            Ok(Err(e)) => log::warn!("controller: calibration failed: {e}"),
            Err(e) => log::warn!("controller: calibration task failed: {e}"),
        }
    }

    /// WakeListening: wait for the wake phrase or typed input.
    async fn wait_for_wake(&mut self, input: &mut mpsc::UnboundedReceiver<String>) -> Next {
        self.sink.publish_status(&self.settings.wake_prompt());

        let (utt_tx, mut utt_rx) = mpsc::unbounded_channel::<Utterance>();
        let listener = match self.capture.listen_in_background(Box::new(move |utterance| {
            // The controller may have stopped listening already.
            let _ = utt_tx.send(utterance);
        })) {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("controller: cannot start background listener: {e}");
                return Next::Shutdown;
            }
        };

        let next = loop {
            tokio::select! {
                biased;

                typed = input.recv() => match typed {
                    Some(text) => {
                        if let Some(next) = self.typed_wake(&text) {
                            break next;
                        }
                    }
                    None => break Next::Shutdown,
                },

                utterance = utt_rx.recv() => match utterance {
                    Some(utterance) => {
                        let Some(text) = self.transcribe(utterance).await else {
                            continue;
                        };
                        if let Some(query) =
                            self.settings.wake.extract(&text, self.settings.min_query_chars)
                        {
                            log::info!("controller: wake phrase heard");
                            break Next::Turn(Some(query));
                        }
                    }
                    None => {
                        log::error!("controller: background listener ended");
                        break Next::Shutdown;
                    }
                },
            }
        };

        stop_listener(listener).await;
        next
    }

    /// Typed text while waiting for the wake phrase.
    fn typed_wake(&self, text: &str) -> Option<Next> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.settings.wake.is_alone_in(text) {
            return Some(Next::Turn(None));
        }
        Some(Next::Turn(Some(text.to_string())))
    }

    /// ActiveTurn: answer queries until a quit word.
    ///
    /// Returns `false` when the controller should shut down.
    async fn active_turn(
        &mut self,
        pending: Option<String>,
        input: &mut mpsc::UnboundedReceiver<String>,
    ) -> bool {
        let mut pending = match pending {
            Some(query) => Some(query),
            None => {
                self.greet().await;
                None
            }
        };

        loop {
            let query = match pending.take() {
                Some(query) => query,
                None => match self.next_query(input).await {
                    Query::Text(query) => query,
                    Query::Nothing => continue,
                    Query::Shutdown => return false,
                },
            };

            if is_quit(&query, &self.settings.quit_words) {
                log::info!("controller: quit word heard, ending turn");
                return true;
            }
            self.respond(&query).await;
        }
    }

    /// Typed input first, then the microphone.
    async fn next_query(&mut self, input: &mut mpsc::UnboundedReceiver<String>) -> Query {
        match input.try_recv() {
            Ok(text) => return non_empty(text),
            Err(TryRecvError::Disconnected) => return Query::Shutdown,
            Err(TryRecvError::Empty) => {}
        }

        let capture = Arc::clone(&self.capture);
        let utterance = match tokio::task::spawn_blocking(move || capture.listen()).await {
            Ok(Ok(utterance)) => utterance,
            Ok(Err(CaptureError::Disconnected)) => {
                log::error!("controller: microphone stream ended");
                return Query::Shutdown;
            }
            Ok(Err(e)) => {
                log::warn!("controller: capture failed: {e}");
                return Query::Nothing;
            }
            Err(e) => {
                log::warn!("controller: capture task failed: {e}");
                return Query::Nothing;
            }
        };

        match self.transcribe(utterance).await {
            Some(text) => non_empty(text),
            None => Query::Nothing,
        }
    }

    // -----------------------------------------------------------------------
    // Replies
    // -----------------------------------------------------------------------

    async fn greet(&mut self) {
        let greeting = self.settings.greeting.clone();
        let tokens: TokenStream =
            Box::pin(futures::stream::once(async move { Ok::<_, ModelError>(greeting) }));
        self.speak(tokens).await;
    }

    async fn respond(&mut self, query: &str) {
        self.sink.publish_status(STATUS_PROCESSING);
        self.record(Role::User, query);

        let tokens = self.tool_loop.run(query);
        self.speak(tokens).await;
    }

    /// Speak a token stream, record it, and wait for playback to finish.
    async fn speak(&mut self, mut tokens: TokenStream) {
        let worker = match SynthesisWorker::spawn(
            Arc::clone(&self.synthesizer),
            self.settings.voice.clone(),
            self.playback.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                log::warn!("controller: cannot start synthesis worker: {e}");
                self.sink.publish_status(STATUS_LISTENING);
                return;
            }
        };
        self.utterances_queued += 1;

        let mut splitter = SentenceSplitter::new();
        while let Some(fragment) = tokens.next().await {
            match fragment {
                Ok(fragment) => {
                    if let Some(sentence) = splitter.push(&fragment) {
                        log::debug!("controller: sentence {sentence:?}");
                        worker.speak(sentence);
                    }
                }
                Err(e) => {
                    log::warn!("controller: model reply failed: {e}");
                    break;
                }
            }
        }

        let split = splitter.finish();
        if let Some(rest) = split.remainder {
            worker.speak(rest);
        }
        let report = worker.finish().await;
        log::debug!("controller: synthesis finished: {report:?}");

        let text = split.full_text.trim();
        if !text.is_empty() {
            self.record(Role::Assistant, text);
        }

        if !self
            .monitor
            .wait_for(self.utterances_queued, self.settings.playback_timeout)
            .await
        {
            log::warn!("controller: playback did not finish in time");
        }
        self.sink.publish_status(STATUS_LISTENING);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Transcribe on the blocking pool.  `None` on failure.
    async fn transcribe(&self, utterance: Utterance) -> Option<String> {
        let stt = Arc::clone(&self.stt);
        let hints = self.settings.hint_words.clone();

        match tokio::task::spawn_blocking(move || stt.transcribe(&utterance.samples, &hints)).await {
            Ok(Ok(text)) => {
                log::debug!("controller: heard {text:?}");
                Some(text)
            }
            Ok(Err(e)) => {
                log::warn!("controller: transcription failed: {e}");
                None
            }
            Err(e) => {
                log::warn!("controller: transcription task failed: {e}");
                None
            }
        }
    }

    fn record(&mut self, role: Role, content: &str) {
        let turn = ConversationTurn::new(role, content);
        self.sink.publish_turn(&turn);
        self.history.push(turn);
    }

    fn enter(&mut self, next: ConversationState) {
        if self.state != next {
            log::info!("controller: {} → {}", self.state, next);
            self.state = next;
        }
    }
}

fn non_empty(text: String) -> Query {
    let text = text.trim();
    if text.is_empty() {
        Query::Nothing
    } else {
        Query::Text(text.to_string())
    }
}

/// Stop the background listener off the async executor; joining may wait
/// for a capture poll interval.
async fn stop_listener(listener: BackgroundListener) {
    if let Err(e) = tokio::task::spawn_blocking(move || listener.stop()).await {
        log::warn!("controller: stopping background listener failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
