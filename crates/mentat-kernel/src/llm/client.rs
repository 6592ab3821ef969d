//! LLM client contract
//!
//! [`LLMClient`] is the base capability every provider implements. The
//! optional capabilities (streaming, tool calling, embeddings, token
//! streaming) are separate traits; a client advertises them through
//! [`LLMClient::capabilities`] and hands out typed handles through the
//! `as_*` accessors, so callers check at dispatch time without downcasting.
//!
//! Failures are [`AgentError::LlmCall`](crate::agent::AgentError) values;
//! `transient` marks rate limits and transport faults. Retry policy is a
//! middleware concern.

use async_trait::async_trait;

use super::streaming::{BoxTokenStream, ChunkStream};
use super::types::*;
use crate::agent::components::tool::ToolDescriptor;
use crate::agent::context::AgentContext;
use crate::agent::error::AgentResult;

/// Base LLM client
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Provider tag, e.g. `"openai"`
    fn provider(&self) -> &str;

    /// Single completion
    async fn complete(
        &self,
        ctx: &AgentContext,
        request: CompletionRequest,
    ) -> AgentResult<CompletionResponse>;

    /// Chat with default sampling parameters
    async fn chat(
        &self,
        ctx: &AgentContext,
        messages: Vec<ChatMessage>,
    ) -> AgentResult<CompletionResponse> {
        self.complete(ctx, CompletionRequest::new(messages)).await
    }

    async fn is_available(&self) -> bool {
        true
    }

    /// Advertised optional capabilities, derived from the accessors
    fn capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();
        if self.as_streaming().is_some() {
            caps.insert(Capability::Streaming);
        }
        if self.as_tool_calling().is_some() {
            caps.insert(Capability::ToolCalling);
        }
        if self.as_embedder().is_some() {
            caps.insert(Capability::Embedding);
        }
        if self.as_token_streaming().is_some() {
            caps.insert(Capability::TokenStreaming);
        }
        caps
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn as_streaming(&self) -> Option<&dyn StreamingClient> {
        None
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingClient> {
        None
    }

    fn as_embedder(&self) -> Option<&dyn EmbeddingClient> {
        None
    }

    fn as_token_streaming(&self) -> Option<&dyn TokenStreamingClient> {
        None
    }
}

/// Chunked streaming completions
#[async_trait]
pub trait StreamingClient: Send + Sync {
    async fn complete_stream(
        &self,
        ctx: &AgentContext,
        request: CompletionRequest,
    ) -> AgentResult<ChunkStream>;
}

/// Completions that may request tool invocations
#[async_trait]
pub trait ToolCallingClient: Send + Sync {
    async fn complete_with_tools(
        &self,
        ctx: &AgentContext,
        request: CompletionRequest,
        tools: &[ToolDescriptor],
    ) -> AgentResult<ToolCallingResponse>;
}

/// Embedding vectors
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, ctx: &AgentContext, text: &str) -> AgentResult<Embedding>;

    async fn embed_batch(&self, ctx: &AgentContext, texts: &[String]) -> AgentResult<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(ctx, text).await?);
        }
        Ok(out)
    }
}

/// Plain string token stream
#[async_trait]
pub trait TokenStreamingClient: Send + Sync {
    async fn stream_tokens(
        &self,
        ctx: &AgentContext,
        request: CompletionRequest,
    ) -> AgentResult<BoxTokenStream>;
}
