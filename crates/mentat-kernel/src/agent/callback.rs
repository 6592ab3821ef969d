//! 回调契约
//! Callback contract
//!
//! 用户回调在 Agent 生命周期的各个节点被调用。任一回调返回错误都会中止执行。
//! User callbacks fire at lifecycle points of an agent execution. Any hook
//! returning an error aborts the execution with that error.
//!
//! Ordering seen by a callback during one execution: exactly one
//! `on_start` first, then LLM and tool hooks (tool start/end balanced),
//! then exactly one of `on_agent_finish` or `on_error`.

use crate::agent::error::{AgentError, AgentResult};
use crate::agent::types::{AgentInput, AgentOutput, ToolArgs};
use crate::usage::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;

/// 回调处理器
/// Callback handler; every hook defaults to a no-op
#[async_trait]
pub trait Callback: Send + Sync {
    async fn on_start(&self, input: &AgentInput) -> AgentResult<()> {
        let _ = input;
        Ok(())
    }

    async fn on_agent_finish(&self, output: &AgentOutput) -> AgentResult<()> {
        let _ = output;
        Ok(())
    }

    async fn on_llm_start(&self, prompts: &[String], model: &str) -> AgentResult<()> {
        let _ = (prompts, model);
        Ok(())
    }

    async fn on_llm_end(&self, output: &str, usage: &TokenUsage) -> AgentResult<()> {
        let _ = (output, usage);
        Ok(())
    }

    async fn on_tool_start(&self, name: &str, input: &ToolArgs) -> AgentResult<()> {
        let _ = (name, input);
        Ok(())
    }

    async fn on_tool_end(&self, name: &str, output: &Value) -> AgentResult<()> {
        let _ = (name, output);
        Ok(())
    }

    async fn on_error(&self, error: &AgentError) -> AgentResult<()> {
        let _ = error;
        Ok(())
    }
}
