//! 执行轨迹
//! Execution trace
//!
//! Accumulates the reasoning steps, tool call records and token usage of a
//! single agent execution. Step indices are assigned here, so they are
//! dense and 1-based regardless of which engine produced the steps.

use mentat_kernel::agent::types::{AgentOutput, AgentStatus, ReasoningStep, ToolCallRecord};
use mentat_kernel::agent::error::AgentError;
use mentat_kernel::usage::TokenUsage;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    steps: Vec<ReasoningStep>,
    tool_calls: Vec<ToolCallRecord>,
    usage: TokenUsage,
    metadata: HashMap<String, Value>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return its assigned index.
    pub fn push_step(&mut self, mut step: ReasoningStep) -> usize {
        step.step_index = self.steps.len() + 1;
        self.steps.push(step);
        self.steps.len()
    }

    pub fn push_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    pub fn add_usage(&mut self, usage: TokenUsage) {
        self.usage += usage;
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// 吸收子 Agent 的输出
    /// Fold a child output in: its steps are re-indexed after ours, its
    /// tool calls appended and its usage added
    pub fn absorb(&mut self, child: &AgentOutput) {
        for step in &child.reasoning_steps {
            self.push_step(step.clone());
        }
        self.tool_calls.extend(child.tool_calls.iter().cloned());
        self.usage += child.token_usage;
    }

    /// Build the final output, draining the trace.
    pub fn into_output(
        self,
        status: AgentStatus,
        result: Value,
        message: impl Into<String>,
    ) -> AgentOutput {
        let mut output = AgentOutput::success(result)
            .with_status(status)
            .with_message(message)
            .with_token_usage(self.usage);
        output.reasoning_steps = self.steps;
        output.tool_calls = self.tool_calls;
        output.metadata = self.metadata;
        output
    }

    /// Build a failed (or partial) output that keeps the collected steps.
    pub fn into_failure(self, error: &AgentError, partial: Option<Value>) -> AgentOutput {
        let (status, result) = match partial {
            Some(v) => (AgentStatus::Partial, v),
            None => (AgentStatus::Failed, Value::Null),
        };
        self.into_output(status, result, error.to_string())
            .with_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_indices_are_dense() {
        let mut trace = ExecutionTrace::new();
        assert_eq!(trace.push_step(ReasoningStep::new("Reasoning", "a", json!(null))), 1);
        assert_eq!(trace.push_step(ReasoningStep::new("Tool:x", "b", json!(1))), 2);

        let mut child = AgentOutput::success("c");
        child.reasoning_steps = vec![ReasoningStep {
            step_index: 7,
            ..ReasoningStep::new("Child", "c", json!(null))
        }];
        child.token_usage = TokenUsage::new(3, 4);
        trace.absorb(&child);

        let indices: Vec<_> = trace.steps().iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(trace.usage().total_tokens, 7);
    }

    #[test]
    fn test_failure_keeps_steps() {
        let mut trace = ExecutionTrace::new();
        trace.push_step(ReasoningStep::new("Reasoning", "t", json!(null)));
        let out = trace.into_failure(&AgentError::ParserFailed("x".into()), None);
        assert_eq!(out.status, AgentStatus::Failed);
        assert_eq!(out.reasoning_steps.len(), 1);
        assert!(out.error.is_some());
    }
}
