//! LLM client contract (§6).
//!
//! This is the boundary the spec calls out of scope: only the shape of
//! `sendMessage`/`sendMessageWithHistory`/`sendFunctionResponse` and the
//! stream/collect surface matter here. [`claude`] is one concrete
//! implementation against the Anthropic Messages API, grounded on
//! `infrastructure::claude::{retry, rate_limiter, error, types}`.

pub mod claude;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::agent::{Turn, TurnPart};

/// A tool call the model requested while streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// One chunk of a streamed model response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
    pub error: Option<String>,
}

/// The fully materialized result of draining a [`LlmStream`].
#[derive(Debug, Clone, Default)]
pub struct CollectedResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

/// A streamed model response. Callers either iterate `chunks` for
/// incremental display or call `collect` to materialize the whole thing.
#[async_trait]
pub trait LlmStream: Send {
    async fn next_chunk(&mut self) -> Option<StreamChunk>;

    /// Drain the remaining stream into a [`CollectedResponse`]. The
    /// default implementation just loops `next_chunk`; concrete streams
    /// override this when they can materialize function calls more
    /// directly from the underlying transport.
    async fn collect(&mut self) -> Result<CollectedResponse, String> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            if let Some(err) = chunk.error {
                return Err(err);
            }
            text.push_str(&chunk.text);
        }
        Ok(CollectedResponse {
            text,
            function_calls: Vec::new(),
        })
    }
}

/// The text-generation service boundary. Thread-safe; a single client is
/// shared across every agent in a run, configured per-request via
/// `with_model`/`set_thinking_budget`/`set_tools`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send_message(&self, prompt: &str) -> Result<Box<dyn LlmStream>, String>;

    async fn send_message_with_history(
        &self,
        history: &[Turn],
        message: &str,
    ) -> Result<Box<dyn LlmStream>, String>;

    /// Used when the most recent turn already carries tool responses, so
    /// an empty user message is never sent to the model.
    async fn send_function_response(
        &self,
        history: &[Turn],
        responses: &[TurnPart],
    ) -> Result<Box<dyn LlmStream>, String>;

    /// Return a client configured against `model`. Implementations clone
    /// cheap internal state (the underlying transport is shared via `Arc`).
    fn with_model(&self, model: &str) -> Box<dyn LlmClient>;

    fn set_thinking_budget(&mut self, tokens: u32);

    fn set_tools(&mut self, tool_names: Vec<String>);
}

/// In-memory stream backed by a fixed vector of chunks. Used by tests and
/// by [`claude::ClaudeClient`] once a response has been fully buffered.
pub struct BufferedStream {
    chunks: std::collections::VecDeque<StreamChunk>,
    function_calls: Vec<FunctionCall>,
}

impl BufferedStream {
    #[must_use]
    pub fn new(text: impl Into<String>, function_calls: Vec<FunctionCall>) -> Self {
        Self {
            chunks: std::collections::VecDeque::from([StreamChunk {
                text: text.into(),
                error: None,
            }]),
            function_calls,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunks: std::collections::VecDeque::from([StreamChunk {
                text: String::new(),
                error: Some(message.into()),
            }]),
            function_calls: Vec::new(),
        }
    }
}

#[async_trait]
impl LlmStream for BufferedStream {
    async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.chunks.pop_front()
    }

    async fn collect(&mut self) -> Result<CollectedResponse, String> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            if let Some(err) = chunk.error {
                return Err(err);
            }
            text.push_str(&chunk.text);
        }
        Ok(CollectedResponse {
            text,
            function_calls: std::mem::take(&mut self.function_calls),
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! A scriptable [`LlmClient`] for agent-loop/router/planner tests,
    //! generalized from the teacher's `mockito`-based HTTP mocking into a
    //! hand-rolled mock since this boundary is a Rust trait, not raw HTTP.

    use super::{BufferedStream, CollectedResponse, FunctionCall, LlmClient, LlmStream};
    use crate::domain::agent::{Turn, TurnPart};
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub struct MockLlmClient {
        responses: Mutex<std::collections::VecDeque<(String, Vec<FunctionCall>)>>,
        pub model: Mutex<Option<String>>,
    }

    impl MockLlmClient {
        #[must_use]
        pub fn new(responses: Vec<(&str, Vec<FunctionCall>)>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(text, calls)| (text.to_string(), calls))
                        .collect(),
                ),
                model: Mutex::new(None),
            }
        }

        fn next_response(&self) -> (String, Vec<FunctionCall>) {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| (String::new(), Vec::new()))
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn send_message(&self, _prompt: &str) -> Result<Box<dyn LlmStream>, String> {
            let (text, calls) = self.next_response();
            Ok(Box::new(FunctionCallStream { text, calls }))
        }

        async fn send_message_with_history(
            &self,
            _history: &[Turn],
            _message: &str,
        ) -> Result<Box<dyn LlmStream>, String> {
            let (text, calls) = self.next_response();
            Ok(Box::new(FunctionCallStream { text, calls }))
        }

        async fn send_function_response(
            &self,
            _history: &[Turn],
            _responses: &[TurnPart],
        ) -> Result<Box<dyn LlmStream>, String> {
            let (text, calls) = self.next_response();
            Ok(Box::new(FunctionCallStream { text, calls }))
        }

        fn with_model(&self, model: &str) -> Box<dyn LlmClient> {
            *self.model.lock().unwrap() = Some(model.to_string());
            Box::new(MockLlmClient {
                responses: Mutex::new(self.responses.lock().unwrap().clone()),
                model: Mutex::new(Some(model.to_string())),
            })
        }

        fn set_thinking_budget(&mut self, _tokens: u32) {}

        fn set_tools(&mut self, _tool_names: Vec<String>) {}
    }

    struct FunctionCallStream {
        text: String,
        calls: Vec<FunctionCall>,
    }

    #[async_trait]
    impl LlmStream for FunctionCallStream {
        async fn next_chunk(&mut self) -> Option<super::StreamChunk> {
            if self.text.is_empty() && self.calls.is_empty() {
                return None;
            }
            let text = std::mem::take(&mut self.text);
            Some(super::StreamChunk { text, error: None })
        }

        async fn collect(&mut self) -> Result<CollectedResponse, String> {
            Ok(CollectedResponse {
                text: std::mem::take(&mut self.text),
                function_calls: std::mem::take(&mut self.calls),
            })
        }
    }

    #[allow(dead_code)]
    fn _keep_buffered_stream_path_exercised() {
        let _ = BufferedStream::new("x", Vec::new());
    }
}
