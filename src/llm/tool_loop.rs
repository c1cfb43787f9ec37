//! Bounded model ↔ tool exchange for one user query.
//!
//! [`ToolCallLoop::run`] returns a lazy stream of reply text.  Each round
//! sends one message to the model:
//!
//! * text fragments are passed straight through to the caller;
//! * a function call is dispatched to the [`ToolInvoker`] and its result (or
//!   error text) becomes the next round's message,
//!   `"Tool_name: <name>, Tool_response: <result>"`;
//! * a reply without a function call ends the loop.
//!
//! After `max_rounds` sends the loop ends quietly even if the model keeps
//! calling tools, so an empty stream is a normal outcome.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::llm::client::{ModelClient, ModelError, ModelEvent, Outgoing, ResponseStream};
use crate::tools::ToolInvoker;

/// Rounds allowed per query unless configured otherwise.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Reply text as it is generated.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// The message that hands a tool's result back to the model.
pub fn tool_response_message(name: &str, result: &str) -> String {
    format!("Tool_name: {name}, Tool_response: {result}")
}

// ---------------------------------------------------------------------------
// ToolCallLoop
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ToolCallLoop {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolInvoker>,
    max_rounds: usize,
}

impl ToolCallLoop {
    pub fn new(model: Arc<dyn ModelClient>, tools: Arc<dyn ToolInvoker>, max_rounds: usize) -> Self {
        Self {
            model,
            tools,
            max_rounds,
        }
    }

    /// Stream the reply to `query`.
    pub fn run(&self, query: impl Into<String>) -> TokenStream {
        let state = LoopState {
            model: Arc::clone(&self.model),
            tools: Arc::clone(&self.tools),
            max_rounds: self.max_rounds,
            round: 0,
            phase: Phase::Send(Outgoing::Query(query.into())),
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            let item = state.step().await?;
            Some((item, state))
        }))
    }
}

enum Phase {
    /// Next message to send to the model.
    Send(Outgoing),
    Streaming(ResponseStream),
    Done,
}

struct LoopState {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolInvoker>,
    max_rounds: usize,
    /// Messages sent so far.
    round: usize,
    phase: Phase,
}

impl LoopState {
    /// Advance until the next text fragment, error, or the end of the loop.
    async fn step(&mut self) -> Option<Result<String, ModelError>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,

                Phase::Send(message) => {
                    if self.round >= self.max_rounds {
                        log::info!(
                            "tools: giving up after {} rounds without a text reply",
                            self.round
                        );
                        return None;
                    }
                    self.round += 1;
                    match self.model.send(&message).await {
                        Ok(stream) => self.phase = Phase::Streaming(stream),
                        Err(e) => return Some(Err(e)),
                    }
                }

                Phase::Streaming(mut stream) => match stream.next().await {
                    Some(Ok(ModelEvent::Text(text))) => {
                        self.phase = Phase::Streaming(stream);
                        if !text.is_empty() {
                            return Some(Ok(text));
                        }
                    }
                    Some(Ok(ModelEvent::FunctionCall { name, args })) => {
                        log::info!("[Calling tool {name} with args {args}]");
                        let result = match self.tools.call_tool(&name, &args).await {
                            Ok(result) => result,
                            Err(e) => {
                                log::warn!("tools: {name} failed: {e}");
                                e.to_string()
                            }
                        };
                        self.phase =
                            Phase::Send(Outgoing::ToolResult(tool_response_message(&name, &result)));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => return None,
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
