//! Agent 核心接口
//! Agent core interface
//!
//! ```text
//! caller ──► Agent::invoke(ctx, input) ──► AgentOutput
//!                │
//!                ├─ invoke_fast: same result, no callback dispatch
//!                └─ stream:      chunks, the last one carries the output
//! ```

use crate::agent::context::AgentContext;
use crate::agent::error::AgentResult;
use crate::agent::types::{AgentInput, AgentOutput, AgentStreamChunk};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Agent 输出流
/// Agent output stream
pub type AgentStream = BoxStream<'static, AgentStreamChunk>;

/// 共享 Agent 句柄
/// Shared agent handle
pub type SharedAgent = Arc<dyn Agent>;

/// Agent 统一接口
/// Unified agent interface
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Agent for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn invoke(&self, _ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
///         Ok(AgentOutput::success(input.task))
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + Sync {
    /// 人类可读名称
    /// Human readable name, unique among siblings under a supervisor
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 能力关键字 (用于能力路由)
    /// Capability keywords, used by capability routing
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// 执行任务
    /// Execute a task
    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput>;

    /// 无回调的快速路径
    /// Fast path that skips callback dispatch
    async fn invoke_fast(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
        self.invoke(ctx, input).await
    }

    /// 流式执行；默认只产生一个携带最终输出的终止块
    /// Streaming execution; defaults to a single terminal chunk
    async fn stream(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentStream> {
        let output = self.invoke(ctx, input).await?;
        Ok(futures::stream::once(async move { AgentStreamChunk::terminal(output) }).boxed())
    }

    /// 是否注册了回调观察者
    /// Whether callbacks are attached
    fn has_observers(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, _ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
            Ok(AgentOutput::success(input.task))
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_single_terminal_chunk() {
        let ctx = AgentContext::new();
        let chunks: Vec<_> = Echo
            .stream(&ctx, AgentInput::new("hi"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].output.as_ref().unwrap().result_text(), "hi");
    }

    #[tokio::test]
    async fn test_invoke_fast_defaults_to_invoke() {
        let ctx = AgentContext::new();
        let out = Echo.invoke_fast(&ctx, "x".into()).await.unwrap();
        assert!(out.is_success());
        assert!(!Echo.has_observers());
    }
}
