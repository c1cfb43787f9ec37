//! Server-sent events and streamed tool-call assembly.
//!
//! Chat-completion streams arrive as `data: {json}` events separated by blank
//! lines, split across network reads at arbitrary byte boundaries.
//! [`SseDecoder`] reassembles them; [`ToolCallAccumulator`] stitches the
//! per-token `tool_calls` deltas back into whole calls.

use serde::Deserialize;

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

/// Incremental `text/event-stream` decoder yielding each event's data.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of an incomplete line.
    partial: Vec<u8>,
    /// `data:` lines of the event being read.
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the data of every event they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                let line = std::mem::take(&mut self.partial);
                self.line(&line, &mut events);
            } else {
                self.partial.push(b);
            }
        }
        events
    }

    /// End of stream: flush a final event that lacked its blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn line(&mut self, raw: &[u8], events: &mut Vec<String>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments (":"), `event:`, `id:` and `retry:` are not used.
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Stream chunk wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Some providers report failures in-band.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// ToolCallAccumulator
// ---------------------------------------------------------------------------

/// A tool call reassembled from its deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text of the arguments.
    pub arguments: String,
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<AssembledCall>,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, delta: &ToolCallDelta) {
        if self.calls.len() <= delta.index {
            self.calls.resize_with(delta.index + 1, AssembledCall::default);
        }
        let call = &mut self.calls[delta.index];
        if let Some(id) = &delta.id {
            call.id.push_str(id);
        }
        if let Some(f) = &delta.function {
            if let Some(name) = &f.name {
                call.name.push_str(name);
            }
            if let Some(args) = &f.arguments {
                call.arguments.push_str(args);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.iter().all(|c| c.name.is_empty())
    }

    /// Completed calls in index order, skipping slots that never got a name.
    pub fn into_calls(self) -> Vec<AssembledCall> {
        self.calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_reads_are_reassembled() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"a\"").is_empty());
        assert!(dec.push(b":1}\n").is_empty());
        assert_eq!(dec.push(b"\ndata: [DONE]\n\n"), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn crlf_and_comments_are_handled() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b": keep-alive\r\n\r\nevent: message\r\ndata:x\r\n\r\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut dec = SseDecoder::new();
        assert_eq!(dec.push(b"data: a\ndata: b\n\n"), vec!["a\nb"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: tail").is_empty());
        assert_eq!(dec.finish(), vec!["tail"]);
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn chunk_with_content_parses() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        assert!(chunk.choices[0].delta.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_deltas_accumulate_by_index() {
        let deltas = [
            r#"{"index":0,"id":"call_1","type":"function","function":{"name":"add_card","arguments":""}}"#,
            r#"{"index":0,"function":{"arguments":"{\"front\":"}}"#,
            r#"{"index":0,"function":{"arguments":"\"hola\"}"}}"#,
            r#"{"index":1,"id":"call_2","function":{"name":"sync","arguments":"{}"}}"#,
        ];
        let mut acc = ToolCallAccumulator::default();
        for d in deltas {
            acc.push(&serde_json::from_str(d).unwrap());
        }
        assert!(!acc.is_empty());

        let calls = acc.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "add_card");
        assert_eq!(calls[0].arguments, r#"{"front":"hola"}"#);
        assert_eq!(calls[1].name, "sync");
    }

    #[test]
    fn empty_accumulator_has_no_calls() {
        let acc = ToolCallAccumulator::default();
        assert!(acc.is_empty());
        assert!(acc.into_calls().is_empty());
    }
}
