//! 并行工具执行器
//! Parallel tool executor
//!
//! Runs a batch of `tool_name -> input` invocations through a shared
//! [`Toolbox`]. Concurrent mode spawns one task per entry and lets every
//! task finish; the first failure in wall-clock order is reported next to
//! the collected outputs. Sequential mode stops at the first failure.

use super::toolbox::{ToolCall, Toolbox};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::AgentError;
use mentat_kernel::agent::types::ToolArgs;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Concurrent,
    Sequential,
}

/// Outputs keyed by tool name plus the first failure, if any
#[derive(Debug, Default)]
pub struct ParallelOutcome {
    pub outputs: HashMap<String, Value>,
    pub first_error: Option<AgentError>,
}

impl ParallelOutcome {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    pub fn into_result(self) -> Result<HashMap<String, Value>, AgentError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.outputs),
        }
    }
}

pub struct ParallelExecutor {
    toolbox: Arc<Toolbox>,
    mode: ExecutionMode,
}

impl ParallelExecutor {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self {
            toolbox,
            mode: ExecutionMode::Concurrent,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub async fn execute<I>(&self, ctx: &AgentContext, calls: I) -> ParallelOutcome
    where
        I: IntoIterator<Item = (String, ToolArgs)>,
    {
        match self.mode {
            ExecutionMode::Concurrent => self.execute_concurrent(ctx, calls).await,
            ExecutionMode::Sequential => self.execute_sequential(ctx, calls).await,
        }
    }

    async fn execute_concurrent<I>(&self, ctx: &AgentContext, calls: I) -> ParallelOutcome
    where
        I: IntoIterator<Item = (String, ToolArgs)>,
    {
        let mut set = JoinSet::new();
        for (name, input) in calls {
            let toolbox = self.toolbox.clone();
            let ctx = ctx.clone();
            set.spawn(async move {
                let result = toolbox.execute(&ctx, ToolCall::new(name.clone(), input)).await;
                (name, result)
            });
        }

        let mut outcome = ParallelOutcome::default();
        // join_next yields in completion order
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, result)) => match result.to_error() {
                    None => {
                        outcome.outputs.insert(name, result.data.unwrap_or(Value::Null));
                    }
                    Some(err) => {
                        if outcome.first_error.is_none() {
                            outcome.first_error = Some(err);
                        }
                    }
                },
                Err(join_err) => {
                    if outcome.first_error.is_none() {
                        outcome.first_error =
                            Some(AgentError::Internal(format!("tool task failed: {join_err}")));
                    }
                }
            }
        }
        outcome
    }

    async fn execute_sequential<I>(&self, ctx: &AgentContext, calls: I) -> ParallelOutcome
    where
        I: IntoIterator<Item = (String, ToolArgs)>,
    {
        let mut outcome = ParallelOutcome::default();
        for (name, input) in calls {
            let result = self.toolbox.execute(ctx, ToolCall::new(name.clone(), input)).await;
            if let Some(err) = result.to_error() {
                outcome.first_error = Some(err);
                break;
            }
            outcome.outputs.insert(name, result.data.unwrap_or(Value::Null));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::adapters::FunctionTool;
    use mentat_kernel::agent::components::tool::{Tool, ToolOutput};
    use mentat_kernel::agent::error::ErrorCode;
    use serde_json::json;
    use std::time::Duration;

    fn delayed(name: &str, delay_ms: u64, fail: bool) -> Arc<dyn Tool> {
        let label = name.to_string();
        Arc::new(FunctionTool::new(
            name,
            "delayed tool",
            json!({"type": "object"}),
            move |_input| {
                let label = label.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if fail {
                        Ok(ToolOutput::failure(format!("{label} failed")))
                    } else {
                        Ok(ToolOutput::success(label))
                    }
                }
            },
        ))
    }

    fn toolbox() -> Arc<Toolbox> {
        Arc::new(
            Toolbox::with_tools([
                delayed("fast", 10, false),
                delayed("slow", 50, false),
                delayed("broken_late", 40, true),
                delayed("broken_early", 20, true),
            ])
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_collects_all_and_first_error() {
        let executor = ParallelExecutor::new(toolbox());
        let ctx = AgentContext::new();
        let started = tokio::time::Instant::now();
        let outcome = executor
            .execute(
                &ctx,
                ["fast", "slow", "broken_late", "broken_early"]
                    .into_iter()
                    .map(|n| (n.to_string(), ToolArgs::new())),
            )
            .await;

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.outputs["slow"], json!("slow"));
        let err = outcome.first_error.unwrap();
        assert_eq!(err.code(), ErrorCode::ToolExecution);
        assert!(err.to_string().contains("broken_early failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_stops_at_first_error() {
        let tb = toolbox();
        let executor = ParallelExecutor::new(tb.clone()).with_mode(ExecutionMode::Sequential);
        let ctx = AgentContext::new();
        let outcome = executor
            .execute(
                &ctx,
                vec![
                    ("fast".to_string(), ToolArgs::new()),
                    ("broken_early".to_string(), ToolArgs::new()),
                    ("slow".to_string(), ToolArgs::new()),
                ],
            )
            .await;

        assert_eq!(outcome.outputs.len(), 1);
        assert!(outcome.outputs.contains_key("fast"));
        assert!(outcome.first_error.is_some());
        assert_eq!(tb.statistics().total_calls, 2);
    }
}
