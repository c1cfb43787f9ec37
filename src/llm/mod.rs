//! Language model access and the tool-calling loop.
//!
//! This module provides:
//! * [`ModelClient`]: async trait: send a message, stream the reply.
//! * [`ChatClient`]: streaming OpenAI-compatible chat client that keeps the
//!   conversation and declares the available tools.
//! * [`ToolCallLoop`]: runs model rounds and tool calls for one query,
//!   streaming the reply text.
//! * [`SseDecoder`] / [`ToolCallAccumulator`]: wire-level stream decoding.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use voice_assistant::config::AppConfig;
//! use voice_assistant::llm::{ChatClient, ToolCallLoop};
//! use voice_assistant::tools::NoTools;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let model = Arc::new(ChatClient::from_config(&config.model, &[]));
//!     let tool_loop = ToolCallLoop::new(model, Arc::new(NoTools), 5);
//!
//!     let mut reply = tool_loop.run("What is the capital of France?");
//!     while let Some(fragment) = reply.next().await {
//!         print!("{}", fragment.unwrap());
//!     }
//! }
//! ```

pub mod client;
pub mod sse;
pub mod tool_loop;

pub use client::{
    decode_stream, ChatClient, ChatHistory, ChatMessage, ModelClient, ModelError, ModelEvent,
    Outgoing, ResponseStream,
};
pub use sse::{AssembledCall, SseDecoder, ToolCallAccumulator};
pub use tool_loop::{tool_response_message, TokenStream, ToolCallLoop, DEFAULT_MAX_ROUNDS};

#[cfg(test)]
pub use client::MockModelClient;
