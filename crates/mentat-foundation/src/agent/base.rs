//! 基础 Agent 实现
//! Agent base shared by every reasoning engine
//!
//! `AgentBase` holds an engine's identity, its callbacks and execution
//! statistics. Each run opens an [`ExecutionScope`] with [`AgentBase::begin`]
//! and closes it with [`ExecutionScope::finish`]. That pairing fires exactly
//! one `on_start` and exactly one terminal hook per run.
//!
//! ```rust,ignore
//! async fn run(&self, ctx: &AgentContext, input: AgentInput, fast: bool) -> AgentResult<AgentOutput> {
//!     let scope = self.base.begin(&input, fast).await?;
//!     let result = self.execute(ctx, &input, &scope).instrument(scope.span()).await;
//!     scope.finish(result).await
//! }
//! ```

use super::tools::toolbox::{ToolCall, ToolExecutionResult, Toolbox};
use super::trace::ExecutionTrace;
use crate::callbacks::{CallbackDispatcher, is_callback_abort};
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult, ErrorCode};
use mentat_kernel::agent::types::{
    AgentInput, AgentOutput, AgentStatus, ReasoningStep, ToolArgs, ToolCallRecord,
};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{CompletionRequest, CompletionResponse};
use mentat_kernel::usage::TokenUsage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Agent 统计信息
/// Execution statistics of one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub partial_executions: u64,
    pub failed_executions: u64,
    pub total_tokens_used: u64,
    pub total_tool_calls: u64,
    pub avg_execution_time_ms: f64,
}

impl AgentStats {
    fn record(&mut self, status: Option<AgentStatus>, duration_ms: u64, tokens: u64, tool_calls: u64) {
        self.total_executions += 1;
        match status {
            Some(AgentStatus::Success) => self.successful_executions += 1,
            Some(AgentStatus::Partial) => self.partial_executions += 1,
            Some(AgentStatus::Failed) | None => self.failed_executions += 1,
        }
        self.total_tokens_used += tokens;
        self.total_tool_calls += tool_calls;

        let n = self.total_executions as f64;
        self.avg_execution_time_ms =
            (self.avg_execution_time_ms * (n - 1.0) + duration_ms as f64) / n;
    }
}

/// Errors that end a run instead of being folded into its output:
/// cancellation and callback aborts.
pub fn is_fatal(error: &AgentError) -> bool {
    error.is_cancelled() || is_callback_abort(error)
}

/// 基础 Agent
/// Agent base
#[derive(Debug, Clone)]
pub struct AgentBase {
    name: String,
    description: String,
    capabilities: Vec<String>,
    callbacks: CallbackDispatcher,
    stats: Arc<Mutex<AgentStats>>,
}

impl AgentBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            callbacks: CallbackDispatcher::new(),
            stats: Arc::new(Mutex::new(AgentStats::default())),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.add(callback);
        self
    }

    pub fn add_callback(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.add(callback);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    pub fn callbacks(&self) -> &CallbackDispatcher {
        &self.callbacks
    }

    pub fn has_observers(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// 获取统计信息快照
    /// Statistics snapshot
    pub fn stats(&self) -> AgentStats {
        self.stats.lock().clone()
    }

    /// 开始一次执行，触发 `on_start`
    /// Open an execution scope and fire `on_start`.
    ///
    /// `fast` skips callback dispatch entirely. When `on_start` aborts,
    /// `on_error` is fired as the terminal hook and the error returned.
    pub async fn begin(&self, input: &AgentInput, fast: bool) -> AgentResult<ExecutionScope> {
        let callbacks = if fast {
            CallbackDispatcher::none()
        } else {
            self.callbacks.clone()
        };
        let span = tracing::info_span!(
            "agent.invoke",
            agent = %self.name,
            fast,
            parent_trace_id = input.parent_trace_id.as_deref().unwrap_or(""),
        );

        if let Err(e) = callbacks.on_start(input).await {
            if let Err(cb_err) = callbacks.on_error(&e).await {
                tracing::warn!(agent = %self.name, error = %cb_err, "on_error callback failed");
            }
            self.stats.lock().record(None, 0, 0, 0);
            return Err(e);
        }
        tracing::debug!(parent: &span, task_len = input.task.len(), "execution started");

        Ok(ExecutionScope {
            agent: self.name.clone(),
            callbacks,
            trace: Mutex::new(ExecutionTrace::new()),
            stats: self.stats.clone(),
            span,
            started: Instant::now(),
        })
    }
}

/// 单次执行的作用域
/// State of one in-flight execution
///
/// Shared by reference across the engine's concurrent branches; the trace
/// sits behind a short-lived lock.
pub struct ExecutionScope {
    agent: String,
    callbacks: CallbackDispatcher,
    trace: Mutex<ExecutionTrace>,
    stats: Arc<Mutex<AgentStats>>,
    span: tracing::Span,
    started: Instant,
}

impl ExecutionScope {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    pub fn callbacks(&self) -> &CallbackDispatcher {
        &self.callbacks
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Append a step; returns its 1-based index.
    pub fn push_step(&self, step: ReasoningStep) -> usize {
        self.trace.lock().push_step(step)
    }

    pub fn step(&self, action: impl Into<String>, description: impl Into<String>, result: Value) -> usize {
        self.push_step(ReasoningStep::new(action, description, result))
    }

    pub fn record_tool_call(&self, record: ToolCallRecord) {
        self.trace.lock().push_tool_call(record);
    }

    pub fn add_usage(&self, usage: TokenUsage) {
        self.trace.lock().add_usage(usage);
    }

    pub fn usage(&self) -> TokenUsage {
        self.trace.lock().usage()
    }

    pub fn step_count(&self) -> usize {
        self.trace.lock().step_count()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.trace.lock().set_metadata(key, value);
    }

    /// Fold a sub-agent output into this trace.
    pub fn absorb(&self, child: &AgentOutput) {
        self.trace.lock().absorb(child);
    }

    /// LLM 调用
    /// Call the model, firing the LLM hooks and accounting usage.
    ///
    /// Providers that omit usage get a local estimate.
    pub async fn llm(
        &self,
        ctx: &AgentContext,
        client: &dyn LLMClient,
        request: CompletionRequest,
    ) -> AgentResult<CompletionResponse> {
        let prompts: Vec<String> = request.messages.iter().map(|m| m.content.clone()).collect();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| client.provider().to_string());
        self.callbacks.on_llm_start(&prompts, &model).await?;

        let prompt_text = request.prompt_text();
        let span = tracing::info_span!("llm.call", agent = %self.agent, provider = client.provider(), model = %model);
        let mut response = ctx
            .guard(client.complete(ctx, request))
            .instrument(span)
            .await?;

        let usage = match response.usage {
            Some(usage) => usage,
            None => {
                let estimated = TokenUsage::estimate(&prompt_text, &response.content);
                tracing::debug!(agent = %self.agent, total = estimated.total_tokens, "usage estimated locally");
                response.usage = Some(estimated);
                estimated
            }
        };
        self.add_usage(usage);
        self.callbacks.on_llm_end(&response.content, &usage).await?;
        Ok(response)
    }

    /// 工具调用
    /// Invoke a tool through the toolbox.
    ///
    /// Tool failures come back encoded in the result; cancellation and
    /// callback aborts are returned as errors. `on_tool_start` and
    /// `on_tool_end` are always paired.
    pub async fn tool(
        &self,
        ctx: &AgentContext,
        toolbox: &Toolbox,
        name: &str,
        args: ToolArgs,
    ) -> AgentResult<ToolExecutionResult> {
        self.callbacks.on_tool_start(name, &args).await?;
        let result = toolbox.execute(ctx, ToolCall::new(name, args.clone())).await;

        let end_value = match (&result.data, result.success) {
            (Some(data), true) => data.clone(),
            _ => Value::String(result.observation()),
        };
        let end = self.callbacks.on_tool_end(name, &end_value).await;

        let record = if result.success {
            ToolCallRecord::success(name, args, result.data.clone().unwrap_or(Value::Null), result.duration_ms)
        } else {
            ToolCallRecord::failure(name, args, result.error.clone().unwrap_or_default(), result.duration_ms)
        };
        self.record_tool_call(record);
        end?;

        if result.error_code == Some(ErrorCode::Cancelled) {
            return Err(AgentError::Cancelled);
        }
        Ok(result)
    }

    fn take_trace(&self) -> ExecutionTrace {
        std::mem::take(&mut *self.trace.lock())
    }

    /// Successful output built from the collected trace.
    pub fn succeed(&self, result: impl Into<Value>, message: impl Into<String>) -> AgentOutput {
        self.take_trace()
            .into_output(AgentStatus::Success, result.into(), message)
    }

    /// Partial output; used when a cap is reached before a final answer.
    pub fn partial(&self, result: impl Into<Value>, message: impl Into<String>) -> AgentOutput {
        self.take_trace()
            .into_output(AgentStatus::Partial, result.into(), message)
    }

    /// 处理引擎失败
    /// Settle an engine failure.
    ///
    /// Cancellation and callback aborts propagate as errors; anything else
    /// becomes a failed output (partial when `partial` carries a value)
    /// that keeps the steps collected so far.
    pub fn fail(&self, error: AgentError, partial: Option<Value>) -> AgentResult<AgentOutput> {
        if is_fatal(&error) {
            return Err(error);
        }
        tracing::warn!(agent = %self.agent, error = %error, "execution failed");
        Ok(self.take_trace().into_failure(&error, partial))
    }

    /// 结束执行，触发唯一的终止回调
    /// Close the scope: stamp latency and fire exactly one terminal hook.
    pub async fn finish(self, result: AgentResult<AgentOutput>) -> AgentResult<AgentOutput> {
        let latency_ms = self.elapsed_ms();
        match result {
            Ok(output) => {
                let output = output.with_latency(latency_ms);
                self.stats.lock().record(
                    Some(output.status),
                    latency_ms,
                    output.token_usage.total_tokens,
                    output.tool_calls.len() as u64,
                );

                if output.status == AgentStatus::Failed {
                    let err = output
                        .error
                        .clone()
                        .map(AgentError::from)
                        .unwrap_or_else(|| AgentError::ExecutionFailed(output.message.clone()));
                    self.callbacks.on_error(&err).await?;
                } else {
                    tracing::info!(
                        parent: &self.span,
                        agent = %self.agent,
                        status = %output.status,
                        steps = output.reasoning_steps.len(),
                        tokens = output.token_usage.total_tokens,
                        latency_ms,
                        "execution finished"
                    );
                    self.callbacks.on_agent_finish(&output).await?;
                }
                Ok(output)
            }
            Err(e) => {
                self.stats.lock().record(None, latency_ms, 0, 0);
                if let Err(cb_err) = self.callbacks.on_error(&e).await {
                    tracing::warn!(agent = %self.agent, error = %cb_err, "on_error callback failed");
                }
                Err(e)
            }
        }
    }
}
