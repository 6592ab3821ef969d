//! 工具箱：统一的工具调用入口
//! Toolbox: the single entry point for tool invocation
//!
//! `execute` resolves, validates and invokes a tool, then records the call
//! in the history and statistics. Failures are encoded in the returned
//! [`ToolExecutionResult`]; use `try_execute` to get them as errors.

use super::registry::ToolRegistry;
use super::validator::{apply_defaults, validate_args};
use crate::callbacks::panic_message;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use mentat_kernel::agent::components::tool::{Tool, ToolDescriptor, ToolInput, ToolStream};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult, ErrorCode};
use mentat_kernel::agent::types::ToolArgs;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

fn panicked(tool: &str, payload: &(dyn Any + Send)) -> AgentError {
    AgentError::tool_execution(tool, format!("tool panicked: {}", panic_message(payload)))
}

/// Turn a panic inside `fut` into a `ToolExecution` error.
fn contain_panic<T>(
    tool: &str,
    fut: impl Future<Output = AgentResult<T>>,
) -> impl Future<Output = AgentResult<T>> {
    let tool = tool.to_string();
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(move |res| res.unwrap_or_else(|payload| Err(panicked(&tool, payload.as_ref()))))
}

/// Upper bound on retained history entries
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// 工具调用请求
/// Tool call request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub input: ToolArgs,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, input: ToolArgs) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            tool_name: tool_name.into(),
            input,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// 工具执行结果
/// Tool execution result
pub struct ToolExecutionResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub is_streaming: bool,
    /// Item stream of a streaming tool
    pub stream: Option<ToolStream>,
}

impl ToolExecutionResult {
    /// The failure as an error, `None` on success.
    pub fn to_error(&self) -> Option<AgentError> {
        if self.success {
            return None;
        }
        let message = self.error.clone().unwrap_or_default();
        Some(match self.error_code {
            Some(ErrorCode::ToolNotFound) => AgentError::ToolNotFound(self.tool_name.clone()),
            Some(ErrorCode::ToolValidation) => AgentError::tool_validation(&self.tool_name, message),
            Some(ErrorCode::Timeout) => AgentError::timeout(self.duration_ms),
            Some(ErrorCode::Cancelled) => AgentError::Cancelled,
            _ => AgentError::tool_execution(&self.tool_name, message),
        })
    }

    /// Text fed back into a prompt as an observation.
    pub fn observation(&self) -> String {
        match (&self.data, &self.error) {
            _ if self.is_streaming => "[streaming result]".to_string(),
            (Some(data), _) if self.success => mentat_kernel::agent::types::value_to_text(data),
            (_, Some(err)) => format!("Error: {err}"),
            _ => String::new(),
        }
    }
}

impl std::fmt::Debug for ToolExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionResult")
            .field("call_id", &self.call_id)
            .field("tool_name", &self.tool_name)
            .field("success", &self.success)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("error_code", &self.error_code)
            .field("duration_ms", &self.duration_ms)
            .field("is_streaming", &self.is_streaming)
            .finish()
    }
}

/// 调用历史记录
/// Call history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHistoryEntry {
    pub call_id: String,
    pub tool_name: String,
    pub input: ToolArgs,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// 聚合统计快照
/// Aggregate statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub total_tools: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub tool_usage: HashMap<String, u64>,
    pub category_usage: HashMap<String, u64>,
    pub average_latency_ms: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    tool_usage: HashMap<String, u64>,
    category_usage: HashMap<String, u64>,
    total_latency_ms: u64,
}

enum Outcome {
    Data(Value),
    Stream(ToolStream),
}

/// 工具箱
/// Toolbox
pub struct Toolbox {
    registry: Arc<ToolRegistry>,
    history: RwLock<Vec<ToolHistoryEntry>>,
    stats: Mutex<StatsInner>,
    call_timeout: Option<Duration>,
    max_history: usize,
}

impl Toolbox {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            history: RwLock::new(Vec::new()),
            stats: Mutex::new(StatsInner::default()),
            call_timeout: None,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Toolbox over a fresh registry holding `tools`.
    pub fn with_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> AgentResult<Self> {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(Self::new(registry))
    }

    /// 单次调用超时
    /// Per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.list()
    }

    /// 执行工具调用
    /// Execute a tool call; failures are encoded in the result
    pub async fn execute(&self, ctx: &AgentContext, call: ToolCall) -> ToolExecutionResult {
        let span = tracing::info_span!("tool.call", tool = %call.tool_name, call_id = %call.id);
        let started = Instant::now();
        let timestamp = Utc::now();
        let tool = self.registry.get(&call.tool_name);
        let category = tool.as_ref().map(|t| t.category().to_string());

        let outcome = match tool {
            Some(tool) => self.run(ctx, tool, &call).instrument(span).await,
            None => Err(AgentError::ToolNotFound(call.tool_name.clone())),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Outcome::Data(data)) => ToolExecutionResult {
                call_id: call.id.clone(),
                tool_name: call.tool_name.clone(),
                success: true,
                data: Some(data),
                error: None,
                error_code: None,
                duration_ms,
                timestamp,
                is_streaming: false,
                stream: None,
            },
            Ok(Outcome::Stream(stream)) => ToolExecutionResult {
                call_id: call.id.clone(),
                tool_name: call.tool_name.clone(),
                success: true,
                data: None,
                error: None,
                error_code: None,
                duration_ms,
                timestamp,
                is_streaming: true,
                stream: Some(stream),
            },
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
                ToolExecutionResult {
                    call_id: call.id.clone(),
                    tool_name: call.tool_name.clone(),
                    success: false,
                    data: None,
                    error: Some(e.root().to_string()),
                    error_code: Some(e.code()),
                    duration_ms,
                    timestamp,
                    is_streaming: false,
                    stream: None,
                }
            }
        };

        self.record(&call, category.as_deref(), &result);
        result
    }

    /// 执行工具调用，失败时返回错误
    /// Execute a tool call, turning an encoded failure into an error
    pub async fn try_execute(
        &self,
        ctx: &AgentContext,
        call: ToolCall,
    ) -> AgentResult<ToolExecutionResult> {
        let result = self.execute(ctx, call).await;
        match result.to_error() {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    async fn run(&self, ctx: &AgentContext, tool: Arc<dyn Tool>, call: &ToolCall) -> AgentResult<Outcome> {
        let schema = tool.parameters_schema();
        let mut args = call.input.clone();
        apply_defaults(&schema, &mut args);
        validate_args(&call.tool_name, &schema, &args, tool.max_string_length())?;

        let call_ctx = match self.call_timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        };
        let input = ToolInput::new(args);

        if tool.supports_streaming() {
            let opened = contain_panic(&call.tool_name, tool.invoke_stream(&call_ctx, input));
            let stream = call_ctx.guard(opened).await?;
            let name = call.tool_name.clone();
            // a panicking stream yields one error item and then ends
            let stream = AssertUnwindSafe(stream)
                .catch_unwind()
                .map(move |item| item.unwrap_or_else(|payload| Err(panicked(&name, payload.as_ref()))))
                .boxed();
            return Ok(Outcome::Stream(stream));
        }

        let invocation = contain_panic(&call.tool_name, tool.invoke(&call_ctx, input));
        let output = call_ctx.guard(invocation).await?;

        if output.success {
            Ok(Outcome::Data(output.result))
        } else {
            Err(AgentError::tool_execution(
                &call.tool_name,
                output.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ))
        }
    }

    fn record(&self, call: &ToolCall, category: Option<&str>, result: &ToolExecutionResult) {
        {
            let mut stats = self.stats.lock();
            stats.total_calls += 1;
            if result.success {
                stats.successful_calls += 1;
            } else {
                stats.failed_calls += 1;
            }
            *stats.tool_usage.entry(call.tool_name.clone()).or_insert(0) += 1;
            if let Some(category) = category {
                *stats.category_usage.entry(category.to_string()).or_insert(0) += 1;
            }
            stats.total_latency_ms += result.duration_ms;
        }

        let mut history = self.history.write();
        history.push(ToolHistoryEntry {
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            success: result.success,
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            timestamp: result.timestamp,
        });
        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(..excess);
        }
    }

    /// 最近的调用记录 (最新的在后)
    /// Most recent history entries, oldest first
    pub fn history(&self, limit: usize) -> Vec<ToolHistoryEntry> {
        let history = self.history.read();
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    pub fn statistics(&self) -> ToolStatistics {
        let stats = self.stats.lock();
        let average_latency_ms = if stats.total_calls == 0 {
            0.0
        } else {
            stats.total_latency_ms as f64 / stats.total_calls as f64
        };
        ToolStatistics {
            total_tools: self.registry.len(),
            total_calls: stats.total_calls,
            successful_calls: stats.successful_calls,
            failed_calls: stats.failed_calls,
            tool_usage: stats.tool_usage.clone(),
            category_usage: stats.category_usage.clone(),
            average_latency_ms,
        }
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field("registry", &self.registry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::adapters::FunctionTool;
    use async_trait::async_trait;
    use futures::StreamExt;
    use mentat_kernel::agent::components::tool::ToolOutput;
    use serde_json::json;

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    fn calculator() -> Arc<dyn Tool> {
        Arc::new(
            FunctionTool::new(
                "calculator",
                "Basic arithmetic",
                json!({
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string", "enum": ["add", "subtract", "multiply", "divide"]},
                        "a": {"type": "number"},
                        "b": {"type": "number"}
                    },
                    "required": ["operation", "a", "b"]
                }),
                |input| async move {
                    let a = input.get_f64("a").unwrap_or_default();
                    let b = input.get_f64("b").unwrap_or_default();
                    match input.get_str("operation") {
                        Some("divide") if b == 0.0 => Ok(ToolOutput::failure("division by zero")),
                        Some("add") => Ok(ToolOutput::success(a + b)),
                        Some("subtract") => Ok(ToolOutput::success(a - b)),
                        Some("multiply") => Ok(ToolOutput::success(a * b)),
                        Some("divide") => Ok(ToolOutput::success(a / b)),
                        _ => Err(AgentError::tool_execution("calculator", "bad op")),
                    }
                },
            )
            .with_category("math"),
        )
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolOutput> {
            panic!("tool exploded");
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::success("late"))
        }
    }

    struct Counter;

    #[async_trait]
    impl Tool for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn description(&self) -> &str {
            "streams 1..=3"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::success(json!([1, 2, 3])))
        }
        fn supports_streaming(&self) -> bool {
            true
        }
        async fn invoke_stream(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolStream> {
            Ok(futures::stream::iter((1..=3).map(|i| Ok(json!(i)))).boxed())
        }
    }

    #[tokio::test]
    async fn test_execute_success_and_stats() {
        let toolbox = Toolbox::with_tools([calculator()]).unwrap();
        let ctx = AgentContext::new();

        let res = toolbox
            .execute(&ctx, ToolCall::new("calculator", args(json!({"operation": "subtract", "a": 15, "b": 5}))))
            .await;
        assert!(res.success);
        assert_eq!(res.data, Some(json!(10.0)));
        assert_eq!(res.observation(), "10.0");

        let stats = toolbox.statistics();
        assert_eq!(stats.total_tools, 1);
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.failed_calls, 0);
        assert_eq!(stats.tool_usage["calculator"], 1);
        assert_eq!(stats.category_usage["math"], 1);
    }

    #[tokio::test]
    async fn test_failures_are_encoded() {
        let toolbox = Toolbox::with_tools([calculator()]).unwrap();
        let ctx = AgentContext::new();

        let missing = toolbox.execute(&ctx, ToolCall::new("nope", ToolArgs::new())).await;
        assert!(!missing.success);
        assert_eq!(missing.error_code, Some(ErrorCode::ToolNotFound));

        let invalid = toolbox
            .execute(&ctx, ToolCall::new("calculator", args(json!({"operation": "add"}))))
            .await;
        assert_eq!(invalid.error_code, Some(ErrorCode::ToolValidation));

        let div0 = toolbox
            .execute(&ctx, ToolCall::new("calculator", args(json!({"operation": "divide", "a": 1, "b": 0}))))
            .await;
        assert_eq!(div0.error_code, Some(ErrorCode::ToolExecution));
        assert!(div0.observation().contains("division by zero"));

        let stats = toolbox.statistics();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.failed_calls, 3);
        assert_eq!(toolbox.history(10).len(), 3);
        assert_eq!(toolbox.history(1)[0].tool_name, "calculator");
    }

    #[tokio::test]
    async fn test_try_execute_returns_error() {
        let toolbox = Toolbox::with_tools([calculator()]).unwrap();
        let ctx = AgentContext::new();
        let err = toolbox
            .try_execute(&ctx, ToolCall::new("ghost", ToolArgs::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let toolbox = Toolbox::with_tools([Arc::new(Panics) as Arc<dyn Tool>]).unwrap();
        let ctx = AgentContext::new();
        let res = toolbox.execute(&ctx, ToolCall::new("panics", ToolArgs::new())).await;
        assert!(!res.success);
        assert_eq!(res.error_code, Some(ErrorCode::ToolExecution));
        assert!(res.error.unwrap().contains("tool exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout() {
        let toolbox = Toolbox::with_tools([Arc::new(Slow) as Arc<dyn Tool>])
            .unwrap()
            .with_call_timeout(Duration::from_millis(100));
        let ctx = AgentContext::new();
        let res = toolbox.execute(&ctx, ToolCall::new("slow", ToolArgs::new())).await;
        assert_eq!(res.error_code, Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let toolbox = Toolbox::with_tools([Arc::new(Slow) as Arc<dyn Tool>]).unwrap();
        let ctx = AgentContext::new();
        ctx.cancel();
        let res = toolbox.execute(&ctx, ToolCall::new("slow", ToolArgs::new())).await;
        assert_eq!(res.error_code, Some(ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn test_streaming_tool() {
        let toolbox = Toolbox::with_tools([Arc::new(Counter) as Arc<dyn Tool>]).unwrap();
        let ctx = AgentContext::new();
        let res = toolbox.execute(&ctx, ToolCall::new("counter", ToolArgs::new())).await;
        assert!(res.success && res.is_streaming);
        let items: Vec<Value> = res
            .stream
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
    }

    /// Streaming tool that panics either on open or after its first item.
    struct BrokenStream {
        on_open: bool,
    }

    #[async_trait]
    impl Tool for BrokenStream {
        fn name(&self) -> &str {
            "broken_stream"
        }
        fn description(&self) -> &str {
            "panics while streaming"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::success(Value::Null))
        }
        fn supports_streaming(&self) -> bool {
            true
        }
        async fn invoke_stream(&self, _ctx: &AgentContext, _input: ToolInput) -> AgentResult<ToolStream> {
            if self.on_open {
                panic!("stream refused to open");
            }
            Ok(futures::stream::iter(1..=3)
                .map(|i| {
                    if i == 2 {
                        panic!("stream broke at {i}");
                    }
                    Ok(json!(i))
                })
                .boxed())
        }
    }

    #[tokio::test]
    async fn test_streaming_panic_is_contained() {
        let ctx = AgentContext::new();
        let toolbox = Toolbox::with_tools([Arc::new(BrokenStream { on_open: true }) as Arc<dyn Tool>]).unwrap();
        let res = toolbox.execute(&ctx, ToolCall::new("broken_stream", ToolArgs::new())).await;
        assert!(!res.success);
        assert_eq!(res.error_code, Some(ErrorCode::ToolExecution));
        assert!(res.error.unwrap().contains("stream refused to open"));

        let toolbox = Toolbox::with_tools([Arc::new(BrokenStream { on_open: false }) as Arc<dyn Tool>]).unwrap();
        let res = toolbox.execute(&ctx, ToolCall::new("broken_stream", ToolArgs::new())).await;
        assert!(res.success && res.is_streaming);
        let items: Vec<AgentResult<Value>> = res.stream.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &json!(1));
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolExecution);
        assert!(err.to_string().contains("stream broke at 2"));
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let toolbox = Toolbox::with_tools([calculator()]).unwrap().with_max_history(2);
        let ctx = AgentContext::new();
        for _ in 0..5 {
            toolbox
                .execute(&ctx, ToolCall::new("calculator", args(json!({"operation": "add", "a": 1, "b": 1}))))
                .await;
        }
        assert_eq!(toolbox.history(100).len(), 2);
        assert_eq!(toolbox.statistics().total_calls, 5);
        toolbox.clear_history();
        assert!(toolbox.history(100).is_empty());
    }
}
