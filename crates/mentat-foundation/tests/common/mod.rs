//! Common test utilities shared across all `mentat-foundation` integration tests.
//!
//! This module is **not** a standalone test binary.  It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod mock_client;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use mentat_foundation::prelude::*;

/// Calculator tool taking either `{"operation", "a", "b"}` or the compact
/// `{"input": "op:a,b"}` form.
pub fn calculator() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "calculator",
        "Performs add, subtract, multiply and divide on two numbers",
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["add", "subtract", "multiply", "divide"]},
                "a": {"type": "number"},
                "b": {"type": "number"},
                "input": {"type": "string"}
            }
        }),
        |input: ToolInput| async move {
            let (op, a, b) = match input.get_str("input") {
                Some(compact) => parse_compact(compact)?,
                None => (
                    input.get_str("operation").unwrap_or_default().to_string(),
                    input.get_f64("a").unwrap_or_default(),
                    input.get_f64("b").unwrap_or_default(),
                ),
            };
            let value = match op.as_str() {
                "add" => a + b,
                "subtract" => a - b,
                "multiply" => a * b,
                "divide" if b == 0.0 => return Ok(ToolOutput::failure("division by zero")),
                "divide" => a / b,
                other => return Ok(ToolOutput::failure(format!("unknown operation: {other}"))),
            };
            Ok(ToolOutput::success(json!(value)))
        },
    ))
}

fn parse_compact(compact: &str) -> AgentResult<(String, f64, f64)> {
    let invalid = || AgentError::tool_validation("calculator", format!("bad input: {compact}"));
    let (op, operands) = compact.split_once(':').ok_or_else(invalid)?;
    let (a, b) = operands.split_once(',').ok_or_else(invalid)?;
    let a = a.trim().parse().map_err(|_| invalid())?;
    let b = b.trim().parse().map_err(|_| invalid())?;
    Ok((op.trim().to_string(), a, b))
}

/// Callback recording every hook as a short event string.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl Callback for RecordingCallback {
    async fn on_start(&self, input: &AgentInput) -> AgentResult<()> {
        self.push(format!("start:{}", input.task));
        Ok(())
    }

    async fn on_agent_finish(&self, output: &AgentOutput) -> AgentResult<()> {
        self.push(format!("finish:{:?}", output.status));
        Ok(())
    }

    async fn on_llm_start(&self, _prompts: &[String], _model: &str) -> AgentResult<()> {
        self.push("llm_start".into());
        Ok(())
    }

    async fn on_llm_end(&self, _output: &str, usage: &TokenUsage) -> AgentResult<()> {
        self.push(format!("llm_end:{}", usage.total_tokens));
        Ok(())
    }

    async fn on_tool_start(&self, name: &str, _input: &ToolArgs) -> AgentResult<()> {
        self.push(format!("tool_start:{name}"));
        Ok(())
    }

    async fn on_tool_end(&self, name: &str, _output: &Value) -> AgentResult<()> {
        self.push(format!("tool_end:{name}"));
        Ok(())
    }

    async fn on_error(&self, error: &AgentError) -> AgentResult<()> {
        self.push(format!("error:{}", error.code()));
        Ok(())
    }
}
