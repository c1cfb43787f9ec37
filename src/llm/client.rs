//! Language-model transport.
//!
//! [`ModelClient::send`] sends one message into an ongoing chat and returns
//! the reply as a stream of [`ModelEvent`]s: text fragments as they are
//! generated, or a request to call a tool.
//!
//! [`ChatClient`] talks to any OpenAI-compatible `/v1/chat/completions`
//! endpoint with `stream: true` (Ollama, OpenAI, Groq, LM Studio, vLLM, …).
//! It keeps the chat history itself, so each `send` continues the same
//! conversation.  An [`Outgoing::ToolResult`] answers the tool call of the
//! previous reply; an [`Outgoing::Query`] starts a new exchange.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::llm::sse::{AssembledCall, ChatChunk, SseDecoder, ToolCallAccumulator};
use crate::tools::ToolSpec;

// ---------------------------------------------------------------------------
// ModelError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("model request timed out")]
    Timeout,

    #[error("model server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse model response: {0}")]
    Parse(String),

    #[error("model reported an error: {0}")]
    Remote(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ModelError::Timeout
        } else {
            ModelError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ModelEvent / ModelClient
// ---------------------------------------------------------------------------

/// One item of a streamed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    FunctionCall { name: String, args: Value },
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

/// A message sent into the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A new question from the user.
    Query(String),
    /// The result of the tool call in the previous reply.
    ToolResult(String),
}

impl Outgoing {
    pub fn text(&self) -> &str {
        match self {
            Outgoing::Query(text) | Outgoing::ToolResult(text) => text,
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `message` as the next chat turn and stream the reply.
    async fn send(&self, message: &Outgoing) -> Result<ResponseStream, ModelError>;
}

// ---------------------------------------------------------------------------
// Chat history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// The running conversation sent with every request.
///
/// Holds the system instruction plus at most `max_messages` further
/// messages; the oldest exchanges are dropped whole, so the chat always
/// resumes at a user message.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    has_system: bool,
    max_messages: usize,
    /// Id of a tool call still waiting for its result.
    pending_call: Option<String>,
}

impl ChatHistory {
    pub fn new(system_instruction: &str) -> Self {
        Self::with_limit(system_instruction, usize::MAX)
    }

    pub fn with_limit(system_instruction: &str, max_messages: usize) -> Self {
        let mut messages = Vec::new();
        let has_system = !system_instruction.trim().is_empty();
        if has_system {
            messages.push(ChatMessage::text("system", system_instruction));
        }
        Self {
            messages,
            has_system,
            max_messages,
            pending_call: None,
        }
    }

    /// Record an outgoing message.
    ///
    /// A new query withdraws a tool call that never got its result (the
    /// tool loop gave up on it), then trims the oldest exchanges.
    pub fn push_input(&mut self, message: &Outgoing) {
        match message {
            Outgoing::ToolResult(text) => match self.pending_call.take() {
                Some(id) => self.messages.push(ChatMessage {
                    role: "tool",
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: Some(id),
                }),
                None => {
                    log::debug!("model: tool result without a pending call, sent as user text");
                    self.messages.push(ChatMessage::text("user", text.as_str()));
                }
            },
            Outgoing::Query(text) => {
                if let Some(id) = self.pending_call.take() {
                    self.withdraw_call(&id);
                }
                self.messages.push(ChatMessage::text("user", text.as_str()));
                self.trim();
            }
        }
    }

    fn withdraw_call(&mut self, id: &str) {
        let Some(pos) = self.messages.iter().rposition(|m| {
            m.tool_calls
                .as_ref()
                .is_some_and(|calls| calls.iter().any(|c| c["id"] == id))
        }) else {
            return;
        };
        if self.messages[pos].content.is_some() {
            self.messages[pos].tool_calls = None;
        } else {
            self.messages.remove(pos);
        }
    }

    fn trim(&mut self) {
        let start = usize::from(self.has_system);
        while self.messages.len() - start > self.max_messages {
            let Some(next) = self.messages[start + 1..]
                .iter()
                .position(|m| m.role == "user")
            else {
                break;
            };
            self.messages.drain(start..start + 1 + next);
        }
    }

    pub fn record_reply(&mut self, text: &str) {
        if !text.is_empty() {
            self.messages.push(ChatMessage::text("assistant", text));
        }
    }

    pub fn record_call(&mut self, text: &str, call: &AssembledCall) {
        let id = if call.id.is_empty() {
            format!("call_{}", self.messages.len())
        } else {
            call.id.clone()
        };
        self.messages.push(ChatMessage {
            role: "assistant",
            content: (!text.is_empty()).then(|| text.to_string()),
            tool_calls: Some(vec![serde_json::json!({
                "id": id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments },
            })]),
            tool_call_id: None,
        });
        self.pending_call = Some(id);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// Streaming OpenAI-compatible chat client with tool declarations.
pub struct ChatClient {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: Option<String>,
    tools: Vec<Value>,
    history: Arc<Mutex<ChatHistory>>,
}

impl ChatClient {
    pub fn from_config(config: &ModelConfig, tools: &[ToolSpec]) -> Self {
        // No overall timeout: a spoken reply may stream for a long time.
        // `timeout_secs` bounds the wait for response headers instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: config.resolved_api_key(),
            tools: tools.iter().map(declare_tool).collect(),
            history: Arc::new(Mutex::new(ChatHistory::with_limit(
                &config.system_instruction,
                config.max_history_messages.max(1),
            ))),
            config: config.clone(),
        }
    }

    fn history(&self) -> MutexGuard<'_, ChatHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the chat so far.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.history().messages().to_vec()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Probe `/v1/models` so an unreachable server is caught at startup.
    pub async fn check_connection(&self) -> Result<(), ModelError> {
        let mut req = self.client.get(self.url("/v1/models"));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), req.send())
            .await
            .map_err(|_| ModelError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = serde_json::json!({
            "model":       self.config.model,
            "messages":    messages,
            "stream":      true,
            "temperature": self.config.temperature,
        });
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(self.tools.clone());
        }
        body
    }
}

fn declare_tool(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name":        spec.name,
            "description": spec.description,
            "parameters":  spec.input_schema,
        }
    })
}

#[async_trait]
impl ModelClient for ChatClient {
    async fn send(&self, message: &Outgoing) -> Result<ResponseStream, ModelError> {
        let body = {
            let mut history = self.history();
            history.push_input(message);
            self.request_body(history.messages())
        };

        let mut req = self.client.post(self.url("/v1/chat/completions")).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), req.send())
            .await
            .map_err(|_| ModelError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_stream(
            response.bytes_stream(),
            Arc::clone(&self.history),
        ))
    }
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    calls: ToolCallAccumulator,
    queued: std::collections::VecDeque<Result<ModelEvent, ModelError>>,
    reply: String,
    history: Arc<Mutex<ChatHistory>>,
    finished: bool,
}

impl<S, B, E> DecodeState<S>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: Into<ModelError>,
{
    async fn next_event(&mut self) -> Option<Result<ModelEvent, ModelError>> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    for data in self.decoder.push(bytes.as_ref()) {
                        self.handle(&data);
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    for data in self.decoder.finish() {
                        self.handle(&data);
                    }
                    self.complete();
                }
            }
        }
    }

    fn handle(&mut self, data: &str) {
        if self.finished {
            return;
        }
        if data.trim() == "[DONE]" {
            self.complete();
            return;
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                self.queued.push_back(Err(ModelError::Parse(e.to_string())));
                self.finished = true;
                return;
            }
        };
        if let Some(error) = chunk.error {
            self.queued.push_back(Err(ModelError::Remote(error.to_string())));
            self.finished = true;
            return;
        }

        for choice in chunk.choices.iter().take(1) {
            if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                self.reply.push_str(text);
                self.queued.push_back(Ok(ModelEvent::Text(text.to_string())));
            }
            for delta in &choice.delta.tool_calls {
                self.calls.push(delta);
            }
        }
    }

    /// End of reply: emit the tool call (if any) and commit the reply to the
    /// chat history.  Only the first call of a reply is honoured.
    fn complete(&mut self) {
        self.finished = true;
        let calls = std::mem::take(&mut self.calls).into_calls();
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());

        match calls.into_iter().next() {
            Some(call) => {
                let args = if call.arguments.trim().is_empty() {
                    Ok(Value::Object(Default::default()))
                } else {
                    serde_json::from_str(&call.arguments)
                };
                match args {
                    Ok(args) => {
                        history.record_call(&self.reply, &call);
                        self.queued.push_back(Ok(ModelEvent::FunctionCall {
                            name: call.name,
                            args,
                        }));
                    }
                    Err(e) => {
                        history.record_reply(&self.reply);
                        self.queued.push_back(Err(ModelError::Parse(format!(
                            "arguments of {}: {e}",
                            call.name
                        ))));
                    }
                }
            }
            None => history.record_reply(&self.reply),
        }
    }
}

/// Turn a raw SSE byte stream into [`ModelEvent`]s, recording the reply in
/// `history` once it is complete.
pub fn decode_stream<S, B, E>(body: S, history: Arc<Mutex<ChatHistory>>) -> ResponseStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ModelError> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        calls: ToolCallAccumulator::default(),
        queued: Default::default(),
        reply: String::new(),
        history,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        let event = state.next_event().await?;
        Some((event, state))
    }))
}

// ---------------------------------------------------------------------------
// MockModelClient  (test-only)
// ---------------------------------------------------------------------------

/// Replays one scripted reply per `send`, recording the messages sent.
///
/// Once the script is exhausted every reply is `fallback` (an empty reply
/// unless set with [`MockModelClient::always`]).
#[cfg(test)]
pub struct MockModelClient {
    script: Mutex<std::collections::VecDeque<Vec<ModelEvent>>>,
    fallback: Vec<ModelEvent>,
    failures: Mutex<usize>,
    sent: Mutex<Vec<Outgoing>>,
}

#[cfg(test)]
impl MockModelClient {
    pub fn new(replies: impl IntoIterator<Item = Vec<ModelEvent>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            fallback: Vec::new(),
            failures: Mutex::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every reply is `reply`.
    pub fn always(reply: Vec<ModelEvent>) -> Self {
        Self {
            fallback: reply,
            ..Self::new(Vec::new())
        }
    }

    /// A single plain-text reply made of `fragments`.
    pub fn text(fragments: &[&str]) -> Self {
        Self::new([fragments
            .iter()
            .map(|f| ModelEvent::Text(f.to_string()))
            .collect::<Vec<_>>()])
    }

    /// The first `n` sends time out without using up the script.
    pub fn failing_first(self, n: usize) -> Self {
        *self.failures.lock().unwrap() = n;
        self
    }

    /// Text of every message sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent_messages().iter().map(|m| m.text().to_string()).collect()
    }

    pub fn sent_messages(&self) -> Vec<Outgoing> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ModelClient for MockModelClient {
    async fn send(&self, message: &Outgoing) -> Result<ResponseStream, ModelError> {
        self.sent.lock().unwrap().push(message.clone());
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ModelError::Timeout);
            }
        }
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::pin(futures::stream::iter(reply.into_iter().map(Ok))))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(events: &[&str]) -> Vec<Result<Vec<u8>, ModelError>> {
        events
            .iter()
            .map(|e| Ok(format!("data: {e}\n\n").into_bytes()))
            .collect()
    }

    fn query(text: &str) -> Outgoing {
        Outgoing::Query(text.into())
    }

    fn history() -> Arc<Mutex<ChatHistory>> {
        Arc::new(Mutex::new(ChatHistory::new("Be brief.")))
    }

    async fn collect(stream: ResponseStream) -> Vec<Result<ModelEvent, ModelError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn text_reply_is_streamed_and_recorded() {
        let h = history();
        h.lock().unwrap().push_input(&query("hi"));
        let body = futures::stream::iter(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"choices":[{"delta":{"content":" there."}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]));

        let events = collect(decode_stream(body, h.clone())).await;
        let texts: Vec<_> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            texts,
            vec![
                ModelEvent::Text("Hello".into()),
                ModelEvent::Text(" there.".into())
            ]
        );

        let h = h.lock().unwrap();
        let last = h.messages().last().unwrap();
        assert_eq!(last.role, "assistant");
        assert_eq!(last.content.as_deref(), Some("Hello there."));
    }

    #[tokio::test]
    async fn tool_call_is_assembled_and_next_input_is_its_result() {
        let h = history();
        h.lock().unwrap().push_input(&query("add a card"));
        let body = futures::stream::iter(sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"add_card","arguments":"{\"front\""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"hola\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]));

        let events = collect(decode_stream(body, h.clone())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &ModelEvent::FunctionCall {
                name: "add_card".into(),
                args: serde_json::json!({ "front": "hola" }),
            }
        );

        let mut h = h.lock().unwrap();
        h.push_input(&Outgoing::ToolResult("Tool_name: add_card, Tool_response: ok".into()));
        let msgs = h.messages();
        let call = &msgs[msgs.len() - 2];
        assert_eq!(call.role, "assistant");
        assert_eq!(call.tool_calls.as_ref().unwrap()[0]["id"], "call_9");
        let result = &msgs[msgs.len() - 1];
        assert_eq!(result.role, "tool");
        assert_eq!(result.tool_call_id.as_deref(), Some("call_9"));
    }

    #[tokio::test]
    async fn stream_without_done_marker_still_completes() {
        let h = history();
        let body = futures::stream::iter(vec![Ok::<_, ModelError>(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}".to_vec(),
        )]);
        let events = collect(decode_stream(body, h.clone())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            h.lock().unwrap().messages().last().unwrap().content.as_deref(),
            Some("ok")
        );
    }

    #[tokio::test]
    async fn malformed_chunk_is_a_parse_error() {
        let body = futures::stream::iter(sse(&["{not json"]));
        let events = collect(decode_stream(body, history())).await;
        assert!(matches!(events.as_slice(), [Err(ModelError::Parse(_))]));
    }

    #[tokio::test]
    async fn in_band_error_is_reported() {
        let body = futures::stream::iter(sse(&[r#"{"error":{"message":"overloaded"}}"#]));
        let events = collect(decode_stream(body, history())).await;
        assert!(matches!(events.as_slice(), [Err(ModelError::Remote(m))] if m.contains("overloaded")));
    }

    #[tokio::test]
    async fn transport_error_ends_the_stream() {
        let body = futures::stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(ModelError::Request("reset".into())),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec()),
        ]);
        let events = collect(decode_stream(body, history())).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ModelError::Request(_))));
    }

    #[test]
    fn history_starts_with_system_instruction() {
        let h = ChatHistory::new("Be brief.");
        assert_eq!(h.messages()[0].role, "system");
        assert!(ChatHistory::new("  ").messages().is_empty());
    }

    #[test]
    fn empty_reply_is_not_recorded() {
        let mut h = ChatHistory::new("");
        h.push_input(&query("hi"));
        h.record_reply("");
        assert_eq!(h.messages().len(), 1);
    }

    fn called(id: &str) -> AssembledCall {
        AssembledCall {
            id: id.into(),
            name: "lookup".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn new_query_withdraws_an_unanswered_call() {
        let mut h = ChatHistory::new("Be brief.");
        h.push_input(&query("first"));
        h.record_call("", &called("call_1"));

        h.push_input(&query("second"));

        let roles: Vec<_> = h.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "user"]);
        assert!(h.messages().iter().all(|m| m.tool_call_id.is_none()));
    }

    #[test]
    fn withdrawn_call_keeps_its_spoken_text() {
        let mut h = ChatHistory::new("");
        h.push_input(&query("first"));
        h.record_call("Let me check.", &called("call_1"));

        h.push_input(&query("second"));

        let msgs = h.messages();
        assert_eq!(msgs[1].role, "assistant");
        assert_eq!(msgs[1].content.as_deref(), Some("Let me check."));
        assert!(msgs[1].tool_calls.is_none());
    }

    #[test]
    fn tool_result_without_a_call_is_user_text() {
        let mut h = ChatHistory::new("");
        h.push_input(&Outgoing::ToolResult("Tool_name: x, Tool_response: y".into()));
        assert_eq!(h.messages()[0].role, "user");
        assert!(h.messages()[0].tool_call_id.is_none());
    }

    #[test]
    fn oldest_exchanges_are_dropped_whole() {
        let mut h = ChatHistory::with_limit("Be brief.", 4);
        h.push_input(&query("one"));
        h.record_call("", &called("call_1"));
        h.push_input(&Outgoing::ToolResult("r".into()));
        h.record_reply("done one");
        h.push_input(&query("two"));
        h.record_reply("done two");
        h.push_input(&query("three"));

        let msgs = h.messages();
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].role, "user");
        assert_eq!(msgs[1].content.as_deref(), Some("two"));
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs.last().unwrap().content.as_deref(), Some("three"));
    }

    #[test]
    fn current_query_survives_a_tiny_limit() {
        let mut h = ChatHistory::with_limit("", 1);
        h.push_input(&query("one"));
        h.record_reply("a long answer");
        h.push_input(&query("two"));
        assert_eq!(h.messages().len(), 1);
        assert_eq!(h.messages()[0].content.as_deref(), Some("two"));
    }

    #[test]
    fn request_body_declares_tools() {
        let spec = ToolSpec {
            name: "add_card".into(),
            description: "Add an Anki card".into(),
            input_schema: serde_json::json!({ "type": "object" }),
        };
        let client = ChatClient::from_config(&ModelConfig::default(), &[spec]);
        let body = client.request_body(&client.transcript());

        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "add_card");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn request_body_omits_empty_tool_list() {
        let client = ChatClient::from_config(&ModelConfig::default(), &[]);
        let body = client.request_body(&[]);
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn unreachable_server_fails_send() {
        let config = ModelConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..ModelConfig::default()
        };
        let client = ChatClient::from_config(&config, &[]);
        assert!(client.send(&query("hello")).await.is_err());
        // The message is still part of the chat.
        assert_eq!(client.transcript().last().unwrap().role, "user");
    }

    #[tokio::test]
    async fn unreachable_server_fails_connection_check() {
        let config = ModelConfig {
            base_url: "http://127.0.0.1:9/".into(),
            timeout_secs: 2,
            ..ModelConfig::default()
        };
        let client = ChatClient::from_config(&config, &[]);
        assert_eq!(client.url("/v1/models"), "http://127.0.0.1:9/v1/models");
        assert!(client.check_connection().await.is_err());
    }
}
