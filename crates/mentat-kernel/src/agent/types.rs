//! Agent 核心类型定义
//! Agent core type definitions
//!
//! 定义统一的 Agent 输入、输出、推理步骤和工具调用记录
//! Defines the unified agent input, output, reasoning step and tool call
//! record types

use crate::agent::error::{AgentError, ErrorInfo};
use crate::usage::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Tool argument map
pub type ToolArgs = Map<String, Value>;

// ============================================================================
// Agent 输入
// Agent Input
// ============================================================================

/// Agent 输入
/// Agent input, immutable once dispatched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    /// 任务文本
    /// Task text
    pub task: String,
    /// 附加上下文
    /// Extra context
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<String>,
}

impl AgentInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: HashMap::new(),
            timestamp: Utc::now(),
            parent_trace_id: None,
        }
    }

    /// 添加上下文
    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_parent_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.parent_trace_id = Some(trace_id.into());
        self
    }

    /// Derive an input for a follow-up task, keeping the context.
    pub fn derive(&self, task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: self.context.clone(),
            timestamp: Utc::now(),
            parent_trace_id: self.parent_trace_id.clone(),
        }
    }
}

impl From<String> for AgentInput {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AgentInput {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Agent 输出
// Agent Output
// ============================================================================

/// 执行状态
/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Success,
    Failed,
    Partial,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Success => write!(f, "success"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Partial => write!(f, "partial"),
        }
    }
}

/// Agent 输出
/// Agent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub status: AgentStatus,
    /// 最终结果
    /// Final result
    pub result: Value,
    #[serde(default)]
    pub message: String,
    /// 推理步骤 (按插入顺序)
    /// Reasoning steps in insertion order
    #[serde(default)]
    pub reasoning_steps: Vec<ReasoningStep>,
    /// 工具调用记录 (按调用顺序)
    /// Tool calls in invocation order
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    /// 执行耗时 (毫秒)
    /// Wall-clock latency (ms)
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Default for AgentOutput {
    fn default() -> Self {
        Self {
            status: AgentStatus::Success,
            result: Value::Null,
            message: String::new(),
            reasoning_steps: Vec::new(),
            tool_calls: Vec::new(),
            token_usage: TokenUsage::default(),
            latency_ms: 0,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            error: None,
        }
    }
}

impl AgentOutput {
    /// 创建成功输出
    /// Create a successful output
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            ..Default::default()
        }
    }

    /// 创建失败输出
    /// Create a failed output
    pub fn failed(error: &AgentError) -> Self {
        Self {
            status: AgentStatus::Failed,
            message: error.to_string(),
            error: Some(error.to_info()),
            ..Default::default()
        }
    }

    /// 创建部分成功输出
    /// Create a partial output
    pub fn partial(result: impl Into<Value>, message: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Partial,
            result: result.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_error(mut self, error: &AgentError) -> Self {
        self.error = Some(error.to_info());
        self
    }

    /// 添加元数据
    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == AgentStatus::Failed
    }

    /// 结果的字符串形式
    /// String cast of the result: strings verbatim, null as empty, JSON
    /// text otherwise
    pub fn result_text(&self) -> String {
        value_to_text(&self.result)
    }
}

/// String cast used when a value is fed back into a prompt or task.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// 辅助类型
// Auxiliary types
// ============================================================================

/// 推理步骤
/// Reasoning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based, dense per execution; assigned by the execution trace
    pub step_index: usize,
    pub action: String,
    pub description: String,
    pub result: Value,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReasoningStep {
    pub fn new(action: impl Into<String>, description: impl Into<String>, result: Value) -> Self {
        Self {
            step_index: 0,
            action: action.into(),
            description: description.into(),
            result,
            duration_ms: 0,
            success: true,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Mark the step failed with the given message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// 工具调用记录
/// Tool call record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: ToolArgs,
    pub output: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    /// 创建成功的工具调用记录
    /// Create a successful tool call record
    pub fn success(
        tool_name: impl Into<String>,
        input: ToolArgs,
        output: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            output,
            success: true,
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// 创建失败的工具调用记录
    /// Create a failed tool call record
    pub fn failure(
        tool_name: impl Into<String>,
        input: ToolArgs,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            output: Value::Null,
            success: false,
            error: Some(error.into()),
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// 流式输出块
/// Streaming output chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStreamChunk {
    /// Incremental text, empty on the terminal chunk of engines that do
    /// not stream incrementally
    pub delta: String,
    pub done: bool,
    /// Final output, present only on the terminal chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AgentStreamChunk {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            done: false,
            output: None,
            error: None,
        }
    }

    pub fn terminal(output: AgentOutput) -> Self {
        Self {
            delta: String::new(),
            done: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn error(error: &AgentError) -> Self {
        Self {
            delta: String::new(),
            done: true,
            output: None,
            error: Some(error.to_info()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_input_builder() {
        let input = AgentInput::new("What is 2+2?")
            .with_context("user", json!("alice"))
            .with_parent_trace_id("trace-1");
        assert_eq!(input.task, "What is 2+2?");
        assert_eq!(input.context["user"], json!("alice"));

        let next = input.derive("follow up");
        assert_eq!(next.task, "follow up");
        assert_eq!(next.parent_trace_id.as_deref(), Some("trace-1"));
        assert_eq!(next.context.len(), 1);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(AgentStatus::Partial).unwrap(), json!("partial"));
        assert_eq!(AgentStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_result_text_cast() {
        assert_eq!(AgentOutput::success("9").result_text(), "9");
        assert_eq!(AgentOutput::success(json!(18)).result_text(), "18");
        assert_eq!(AgentOutput::default().result_text(), "");
    }

    #[test]
    fn test_failed_output_carries_error_info() {
        let err = AgentError::cycle_detected("b").with_component("got");
        let out = AgentOutput::failed(&err);
        assert!(out.is_failed());
        let info = out.error.unwrap();
        assert_eq!(info.code, crate::agent::error::ErrorCode::CycleDetected);
        assert_eq!(info.component.as_deref(), Some("got"));
    }
}
