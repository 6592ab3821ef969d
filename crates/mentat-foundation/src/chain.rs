//! 顺序组合
//! Sequential agent composition
//!
//! ```text
//! input ──► agent 1 ──result──► agent 2 ──result──► ... ──► agent N ──► output
//! ```
//!
//! Each stage receives a task derived from the previous stage's result
//! (plain text by default) and keeps the original input context. The first
//! failing stage stops the chain. Steps, tool calls and token usage of all
//! stages are concatenated into the chain's output.

use crate::agent::base::{AgentBase, ExecutionScope};
use async_trait::async_trait;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::{Agent, SharedAgent};
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, AgentStatus, value_to_text};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::Instrument;

/// Builds the next stage's task from the previous stage's output.
pub type TaskMapper = Arc<dyn Fn(&AgentOutput) -> String + Send + Sync>;

/// Chain the given agents with the default name and task mapping.
pub fn chain<I>(agents: I) -> AgentResult<AgentChain>
where
    I: IntoIterator<Item = SharedAgent>,
{
    agents
        .into_iter()
        .fold(AgentChain::builder(), AgentChainBuilder::then)
        .build()
}

/// 顺序链
/// Agents run one after another
pub struct AgentChain {
    base: AgentBase,
    stages: Vec<SharedAgent>,
    mapper: Option<TaskMapper>,
}

impl AgentChain {
    pub fn builder() -> AgentChainBuilder {
        AgentChainBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|a| a.name().to_string()).collect()
    }

    fn next_task(&self, previous: &AgentOutput) -> String {
        match &self.mapper {
            Some(mapper) => mapper(previous),
            None => value_to_text(&previous.result),
        }
    }

    async fn run(&self, ctx: &AgentContext, input: AgentInput, fast: bool) -> AgentResult<AgentOutput> {
        let scope = self.base.begin(&input, fast).await?;
        let result = self.execute(ctx, &input, &scope).instrument(scope.span()).await;
        scope.finish(result).await
    }

    async fn execute(
        &self,
        ctx: &AgentContext,
        input: &AgentInput,
        scope: &ExecutionScope,
    ) -> AgentResult<AgentOutput> {
        let mut result = Value::Null;
        let mut partial = false;
        let mut completed: Vec<&str> = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if let Err(e) = ctx.check() {
                return scope.fail(e, None);
            }
            let stage_input = if index == 0 {
                input.clone()
            } else {
                input.derive(value_to_text(&result))
            };
            let stage_input = match &ctx.trace_id {
                Some(trace_id) => stage_input.with_parent_trace_id(trace_id.clone()),
                None => stage_input,
            };

            tracing::debug!(chain = %self.base.name(), stage = index + 1, agent = %stage.name(), "chain stage started");
            let outcome = if stage.has_observers() {
                stage.invoke(ctx, stage_input).await
            } else {
                stage.invoke_fast(ctx, stage_input).await
            };
            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    scope.set_metadata("completed_stages", json!(completed));
                    let e = e
                        .with_component("chain")
                        .with_context("stage", stage.name());
                    return scope.fail(e, None);
                }
            };

            scope.absorb(&output);
            if output.is_failed() {
                scope.set_metadata("completed_stages", json!(completed));
                let error = output
                    .error
                    .clone()
                    .map(AgentError::from)
                    .unwrap_or_else(|| AgentError::ExecutionFailed(output.message.clone()));
                return scope.fail(
                    error.with_component("chain").with_context("stage", stage.name()),
                    None,
                );
            }

            partial |= output.status == AgentStatus::Partial;
            completed.push(stage.name());
            result = match &self.mapper {
                Some(_) if index + 1 < self.stages.len() => json!(self.next_task(&output)),
                _ => output.result,
            };
        }

        scope.set_metadata("stages", json!(self.stage_names()));
        scope.set_metadata("completed_stages", json!(completed));
        if partial {
            Ok(scope.partial(result, "chain complete with partial stages"))
        } else {
            Ok(scope.succeed(result, "chain complete"))
        }
    }
}

#[async_trait]
impl Agent for AgentChain {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> &str {
        self.base.description()
    }

    fn capabilities(&self) -> Vec<String> {
        self.base.capabilities()
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
        self.run(ctx, input, false).await
    }

    async fn invoke_fast(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
        self.run(ctx, input, true).await
    }

    fn has_observers(&self) -> bool {
        self.base.has_observers()
    }
}

/// 顺序链构建器
/// Chain builder
#[derive(Default)]
pub struct AgentChainBuilder {
    name: Option<String>,
    stages: Vec<SharedAgent>,
    mapper: Option<TaskMapper>,
    callbacks: Vec<Arc<dyn Callback>>,
}

impl AgentChainBuilder {
    /// Append a stage.
    pub fn then(mut self, agent: SharedAgent) -> Self {
        self.stages.push(agent);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the default plain-text task derivation.
    pub fn with_mapper(mut self, mapper: impl Fn(&AgentOutput) -> String + Send + Sync + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn build(self) -> AgentResult<AgentChain> {
        if self.stages.is_empty() {
            return Err(AgentError::ConfigInvalid("chain: at least one agent is required".into()));
        }
        let name = self.name.unwrap_or_else(|| {
            let names: Vec<&str> = self.stages.iter().map(|a| a.name()).collect();
            format!("chain({})", names.join(" -> "))
        });
        let mut base = AgentBase::new(name)
            .with_description("Runs agents in sequence, piping each result into the next task")
            .with_capabilities(["chain", "sequential"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(AgentChain {
            base,
            stages: self.stages,
            mapper: self.mapper,
        })
    }
}
