//! Mock LLM client for `mentat-foundation` integration tests.
//!
//! [`MockLLMClient`] implements [`LLMClient`] and [`StreamingClient`] and is
//! the test double for every end-to-end scenario in this crate. It records
//! every call and answers deterministically.
//!
//! # Answer selection
//!
//! | Order | Source |
//! |-------|--------|
//! | 1 | First rule whose substring occurs in the prompt |
//! | 2 | Front of the FIFO response queue |
//! | 3 | The default reply |
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = MockLLMClient::builder()
//!     .respond_with("Thought: add\nFinal Answer: 2")
//!     .when_prompt_contains("skeleton outline", "1. A: a")
//!     .with_latency(Duration::from_millis(50))
//!     .build();
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::llm::{
    ChunkStream, CompletionRequest, CompletionResponse, LLMClient, StreamChunk, StreamingClient,
};
use mentat_kernel::usage::TokenUsage;

pub const DEFAULT_REPLY: &str = "This is a mock response.";

/// Usage attached to every reply unless usage is omitted
pub const MOCK_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

#[derive(Default)]
struct MockState {
    /// Flattened prompt of every call, in call order
    calls: Vec<String>,
    responses: VecDeque<AgentResult<String>>,
}

/// Deterministic in-process [`LLMClient`].
///
/// Clones of the `Arc` share the call log; no lock is held across an await.
pub struct MockLLMClient {
    provider: String,
    rules: Vec<(String, AgentResult<String>)>,
    default_reply: String,
    latency: Duration,
    omit_usage: bool,
    streaming: bool,
    state: Mutex<MockState>,
}

impl MockLLMClient {
    pub fn builder() -> MockLLMClientBuilder {
        MockLLMClientBuilder::default()
    }

    /// Client answering every prompt with `reply`.
    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        Self::builder().with_default_reply(reply).build()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.state.lock().calls.last().cloned()
    }

    fn answer(&self, prompt: &str) -> AgentResult<String> {
        let mut state = self.state.lock();
        state.calls.push(prompt.to_string());
        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return reply.clone();
        }
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn complete(
        &self,
        _ctx: &AgentContext,
        request: CompletionRequest,
    ) -> AgentResult<CompletionResponse> {
        let reply = self.answer(&request.prompt_text());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = CompletionResponse::new(reply?);
        Ok(if self.omit_usage {
            response
        } else {
            response.with_usage(MOCK_USAGE)
        })
    }

    fn as_streaming(&self) -> Option<&dyn StreamingClient> {
        self.streaming.then_some(self as &dyn StreamingClient)
    }
}

#[async_trait]
impl StreamingClient for MockLLMClient {
    /// Streams the chosen reply one word at a time, then a terminal chunk.
    async fn complete_stream(
        &self,
        _ctx: &AgentContext,
        request: CompletionRequest,
    ) -> AgentResult<ChunkStream> {
        let reply = self.answer(&request.prompt_text())?;
        let usage = (!self.omit_usage).then_some(MOCK_USAGE);
        let mut so_far = String::new();
        let mut chunks = Vec::new();
        for (i, word) in reply.split(' ').enumerate() {
            let delta = if i == 0 { word.to_string() } else { format!(" {word}") };
            let chunk = StreamChunk::text(&so_far, delta);
            so_far = chunk.content_so_far.clone();
            chunks.push(chunk);
        }
        chunks.push(StreamChunk::done(so_far, usage));
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Fluent builder for [`MockLLMClient`].
pub struct MockLLMClientBuilder {
    provider: String,
    rules: Vec<(String, AgentResult<String>)>,
    default_reply: String,
    latency: Duration,
    omit_usage: bool,
    streaming: bool,
    responses: VecDeque<AgentResult<String>>,
}

impl Default for MockLLMClientBuilder {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            rules: Vec::new(),
            default_reply: DEFAULT_REPLY.to_string(),
            latency: Duration::ZERO,
            omit_usage: false,
            streaming: true,
            responses: VecDeque::new(),
        }
    }
}

impl MockLLMClientBuilder {
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Enqueue a reply; replies are consumed in FIFO order.
    pub fn respond_with(mut self, content: impl Into<String>) -> Self {
        self.responses.push_back(Ok(content.into()));
        self
    }

    /// Enqueue an error for the next unmatched call.
    pub fn respond_with_error(mut self, error: AgentError) -> Self {
        self.responses.push_back(Err(error));
        self
    }

    /// Answer every prompt containing `needle` with `reply`, ahead of the queue.
    pub fn when_prompt_contains(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(reply.into())));
        self
    }

    /// Fail every prompt containing `needle`.
    pub fn fail_when_prompt_contains(mut self, needle: impl Into<String>, error: AgentError) -> Self {
        self.rules.push((needle.into(), Err(error)));
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Delay applied to every completion.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Return responses without usage so callers must estimate it.
    pub fn without_usage(mut self) -> Self {
        self.omit_usage = true;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn build(self) -> Arc<MockLLMClient> {
        Arc::new(MockLLMClient {
            provider: self.provider,
            rules: self.rules,
            default_reply: self.default_reply,
            latency: self.latency,
            omit_usage: self.omit_usage,
            streaming: self.streaming,
            state: Mutex::new(MockState {
                calls: Vec::new(),
                responses: self.responses,
            }),
        })
    }
}
