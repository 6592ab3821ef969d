//! 监督者 Agent
//! Supervisor agent
//!
//! ```text
//! task ──► Router ──► [(agent, sub-task), ...]
//!                          │
//!          hierarchy: one after another, earlier outputs in the context
//!          otherwise: concurrently, at most `max_parallel` at a time
//!                          │
//!                     Aggregation ──► AgentOutput
//! ```
//!
//! Each sub-agent runs on a forked context with its own deadline; a
//! timed-out or failed sub-agent marks only its own slot as failed. When
//! every sub-agent fails the supervisor fails; when some fail the output is
//! `partial` and aggregation uses the successful ones.

pub mod aggregation;
pub mod routing;

pub use aggregation::{AggregationStrategy, Aggregated, SubAgentOutcome};
pub use routing::{
    AgentProfile, Assignment, CapabilityRouter, LlmRouter, RoundRobinRouter, Router, RoutingRule,
    RoutingStrategy, RuleCondition, RuleRouter, parse_plan,
};

use crate::agent::base::{AgentBase, ExecutionScope};
use crate::agent::prompt::render_task;
use async_trait::async_trait;
use futures::future::join_all;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::{Agent, SharedAgent};
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ReasoningStep};
use mentat_kernel::llm::client::LLMClient;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;

/// Context key holding earlier sub-agent results in hierarchy mode.
pub const PREVIOUS_OUTPUTS_KEY: &str = "previous_outputs";

/// 监督者配置
/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub name: String,
    pub description: String,
    pub routing_strategy: RoutingStrategy,
    pub aggregation_strategy: AggregationStrategy,
    /// Deadline for each sub-agent run
    pub sub_agent_timeout_ms: u64,
    /// Sub-agents running at the same time
    pub max_parallel: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "supervisor".to_string(),
            description: "Routes sub-tasks to sub-agents and aggregates their outputs".to_string(),
            routing_strategy: RoutingStrategy::Llm,
            aggregation_strategy: AggregationStrategy::Merge,
            sub_agent_timeout_ms: 30_000,
            max_parallel: 5,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_parallel == 0 {
            return Err(AgentError::ConfigInvalid(
                "supervisor: max_parallel must be at least 1".into(),
            ));
        }
        if self.sub_agent_timeout_ms == 0 {
            return Err(AgentError::ConfigInvalid(
                "supervisor: sub_agent_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SubAgent {
    name: String,
    agent: SharedAgent,
    capabilities: Vec<String>,
}

/// 监督者 Agent
/// Supervisor agent
///
/// Sub-agents can be added and removed while the supervisor is shared; a
/// run works on the set registered when it starts.
pub struct SupervisorAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    router: Arc<dyn Router>,
    sub_agents: RwLock<Vec<SubAgent>>,
    config: SupervisorConfig,
}

impl SupervisorAgent {
    pub fn builder() -> SupervisorAgentBuilder {
        SupervisorAgentBuilder::default()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// 注册子 Agent
    /// Register a sub-agent under its name with its own capabilities
    pub fn add_sub_agent(&self, agent: SharedAgent) -> AgentResult<()> {
        let capabilities = agent.capabilities();
        self.add_sub_agent_with_capabilities(agent, capabilities)
    }

    /// Register a sub-agent with declared capabilities used by capability
    /// routing in place of the agent's own.
    pub fn add_sub_agent_with_capabilities<I, S>(&self, agent: SharedAgent, capabilities: I) -> AgentResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = agent.name().to_string();
        let mut sub_agents = self.sub_agents.write();
        if sub_agents.iter().any(|s| s.name == name) {
            return Err(AgentError::AlreadyExists(format!("sub-agent '{name}'")));
        }
        tracing::debug!(supervisor = %self.base.name(), sub_agent = %name, "sub-agent registered");
        sub_agents.push(SubAgent {
            name,
            agent,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        });
        Ok(())
    }

    pub fn remove_sub_agent(&self, name: &str) -> Option<SharedAgent> {
        let mut sub_agents = self.sub_agents.write();
        let index = sub_agents.iter().position(|s| s.name == name)?;
        Some(sub_agents.remove(index).agent)
    }

    /// Registered sub-agent names, in registration order.
    pub fn sub_agent_names(&self) -> Vec<String> {
        self.sub_agents.read().iter().map(|s| s.name.clone()).collect()
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
        let roster: Vec<SubAgent> = self.sub_agents.read().clone();
        if roster.is_empty() {
            return scope.fail(
                AgentError::ConfigInvalid("supervisor has no sub-agents".into()),
                None,
            );
        }
        let catalog: Vec<AgentProfile> = roster
            .iter()
            .map(|s| AgentProfile {
                name: s.name.clone(),
                description: s.agent.description().to_string(),
                capabilities: s.capabilities.clone(),
            })
            .collect();

        let task = render_task(input);
        let plan = match self.router.route(ctx, scope, &task, &catalog).await {
            Ok(plan) => plan
                .into_iter()
                .filter(|a| roster.iter().any(|s| s.name == a.agent))
                .collect::<Vec<_>>(),
            Err(e) => return scope.fail(e, None),
        };
        if plan.is_empty() {
            return scope.fail(
                AgentError::ExecutionFailed("routing produced no assignments".into()),
                None,
            );
        }
        scope.step(
            "Route Task",
            format!("{} routing", self.router.strategy()),
            json!(plan),
        );

        let outcomes = if self.config.aggregation_strategy == AggregationStrategy::Hierarchy {
            self.dispatch_sequential(ctx, input, &roster, &plan).await
        } else {
            self.dispatch_parallel(ctx, input, &roster, &plan).await
        };
        if let Err(e) = ctx.check() {
            return scope.fail(e, None);
        }

        for outcome in &outcomes {
            if let Some(output) = &outcome.output {
                scope.absorb(output);
            }
            let step = ReasoningStep::new(
                format!("Delegate to {}", outcome.agent),
                outcome.task.clone(),
                outcome.result(),
            )
            .with_duration(outcome.duration_ms);
            scope.push_step(match &outcome.error {
                Some(error) => step.failed(error.to_string()),
                None => step,
            });
        }

        let mut agents_used: Vec<&str> = Vec::new();
        for outcome in &outcomes {
            if !agents_used.contains(&outcome.agent.as_str()) {
                agents_used.push(&outcome.agent);
            }
        }
        scope.set_metadata("tasks_executed", json!(plan.len()));
        scope.set_metadata("agents_used", json!(agents_used));
        scope.set_metadata("routing_strategy", json!(self.router.strategy().as_str()));
        scope.set_metadata(
            "aggregation_strategy",
            json!(self.config.aggregation_strategy.as_str()),
        );

        let failures: Map<String, Value> = outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (o.agent.clone(), json!(e.to_string()))))
            .collect();
        if !failures.is_empty() {
            scope.set_metadata("failed_agents", Value::Object(failures.clone()));
        }

        let successes: Vec<&SubAgentOutcome> = outcomes.iter().filter(|o| o.succeeded()).collect();
        if successes.is_empty() {
            return scope.fail(
                AgentError::ExecutionFailed(format!("all {} sub-agents failed", outcomes.len())),
                None,
            );
        }

        let aggregated = match self.aggregate(ctx, scope, &task, &successes).await {
            Ok(aggregated) => aggregated,
            Err(e) => return scope.fail(e, None),
        };
        for (key, value) in aggregated.metadata {
            scope.set_metadata(key, value);
        }

        if failures.is_empty() {
            Ok(scope.succeed(aggregated.result, "supervisor complete"))
        } else {
            Ok(scope.partial(
                aggregated.result,
                format!("{} of {} sub-agents failed", failures.len(), outcomes.len()),
            ))
        }
    }

    async fn aggregate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        successes: &[&SubAgentOutcome],
    ) -> AgentResult<Aggregated> {
        match self.config.aggregation_strategy {
            AggregationStrategy::Merge => Ok(aggregation::merge(successes)),
            AggregationStrategy::Hierarchy => Ok(aggregation::hierarchy(successes)),
            AggregationStrategy::Best => {
                aggregation::best(ctx, scope, self.llm.as_ref(), task, successes).await
            }
            AggregationStrategy::Consensus => {
                aggregation::consensus(ctx, scope, self.llm.as_ref(), task, successes).await
            }
        }
    }

    /// 并发分派
    /// Run every assignment, at most `max_parallel` at a time. Outcomes keep
    /// plan order.
    async fn dispatch_parallel(
        &self,
        ctx: &AgentContext,
        input: &AgentInput,
        roster: &[SubAgent],
        plan: &[Assignment],
    ) -> Vec<SubAgentOutcome> {
        let semaphore = Semaphore::new(self.config.max_parallel);
        let runs = plan.iter().map(|assignment| {
            let semaphore = &semaphore;
            async move {
                let permit = ctx
                    .guard(async {
                        semaphore
                            .acquire()
                            .await
                            .map_err(|_| AgentError::Internal("supervisor semaphore closed".into()))
                    })
                    .await;
                let _permit = match permit {
                    Ok(permit) => permit,
                    Err(e) => return SubAgentOutcome::new(assignment, Err(e), 0),
                };
                self.dispatch(ctx, roster, assignment, input.derive(&assignment.task))
                    .await
            }
        });
        join_all(runs).await
    }

    /// 顺序分派
    /// Run assignments one after another, passing earlier results on in
    /// the input context under `previous_outputs`.
    async fn dispatch_sequential(
        &self,
        ctx: &AgentContext,
        input: &AgentInput,
        roster: &[SubAgent],
        plan: &[Assignment],
    ) -> Vec<SubAgentOutcome> {
        let mut previous = Map::new();
        let mut outcomes = Vec::with_capacity(plan.len());
        for assignment in plan {
            if ctx.is_cancelled() {
                break;
            }
            let sub_input = input
                .derive(&assignment.task)
                .with_context(PREVIOUS_OUTPUTS_KEY, Value::Object(previous.clone()));
            let outcome = self.dispatch(ctx, roster, assignment, sub_input).await;
            if outcome.succeeded() {
                previous.insert(outcome.agent.clone(), outcome.result());
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// One sub-agent run on a forked context bounded by the sub-agent
    /// timeout.
    async fn dispatch(
        &self,
        ctx: &AgentContext,
        roster: &[SubAgent],
        assignment: &Assignment,
        input: AgentInput,
    ) -> SubAgentOutcome {
        let started = Instant::now();
        let Some(sub_agent) = roster.iter().find(|s| s.name == assignment.agent) else {
            let missing = AgentError::NotFound(format!("sub-agent '{}'", assignment.agent));
            return SubAgentOutcome::new(assignment, Err(missing), 0);
        };
        let sub_ctx = ctx
            .fork()
            .with_timeout(Duration::from_millis(self.config.sub_agent_timeout_ms));
        let input = match &ctx.trace_id {
            Some(trace_id) => input.with_parent_trace_id(trace_id.clone()),
            None => input,
        };
        let span = tracing::info_span!(
            "supervisor.dispatch",
            supervisor = %self.base.name(),
            sub_agent = %assignment.agent,
        );

        let agent = &sub_agent.agent;
        let result = sub_ctx
            .guard(async {
                if agent.has_observers() {
                    agent.invoke(&sub_ctx, input).await
                } else {
                    agent.invoke_fast(&sub_ctx, input).await
                }
            })
            .instrument(span)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = &result {
            tracing::warn!(sub_agent = %assignment.agent, error = %e, duration_ms, "sub-agent failed");
        }
        SubAgentOutcome::new(assignment, result, duration_ms)
    }
}

#[async_trait]
impl Agent for SupervisorAgent {
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

/// 监督者构建器
/// Supervisor builder
#[derive(Default)]
pub struct SupervisorAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    router: Option<Arc<dyn Router>>,
    sub_agents: Vec<(SharedAgent, Option<Vec<String>>)>,
    callbacks: Vec<Arc<dyn Callback>>,
    config: SupervisorConfig,
}

impl SupervisorAgentBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Use a custom router; the configured routing strategy is ignored.
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Route with keyword rules.
    pub fn with_rules(mut self, rules: RuleRouter) -> Self {
        self.config.routing_strategy = RoutingStrategy::Rule;
        self.router = Some(Arc::new(rules));
        self
    }

    pub fn with_sub_agent(mut self, agent: SharedAgent) -> Self {
        self.sub_agents.push((agent, None));
        self
    }

    pub fn with_sub_agent_capabilities<I, S>(mut self, agent: SharedAgent, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capabilities = capabilities.into_iter().map(Into::into).collect();
        self.sub_agents.push((agent, Some(capabilities)));
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_routing(mut self, strategy: RoutingStrategy) -> Self {
        self.config.routing_strategy = strategy;
        self
    }

    pub fn with_aggregation(mut self, strategy: AggregationStrategy) -> Self {
        self.config.aggregation_strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.config.max_parallel = max;
        self
    }

    pub fn with_sub_agent_timeout(mut self, timeout: Duration) -> Self {
        self.config.sub_agent_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> AgentResult<SupervisorAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("supervisor: LLM client not set".to_string()))?;
        let router: Arc<dyn Router> = match self.router {
            Some(router) => router,
            None => match self.config.routing_strategy {
                RoutingStrategy::Llm => Arc::new(LlmRouter::new(llm.clone())),
                RoutingStrategy::Rule => Arc::new(RuleRouter::new()),
                RoutingStrategy::RoundRobin => Arc::new(RoundRobinRouter::new()),
                RoutingStrategy::Capability => Arc::new(CapabilityRouter::new()),
            },
        };

        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["supervisor", "routing", "aggregation"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        let supervisor = SupervisorAgent {
            base,
            llm,
            router,
            sub_agents: RwLock::new(Vec::new()),
            config: self.config,
        };
        for (agent, capabilities) in self.sub_agents {
            match capabilities {
                Some(capabilities) => supervisor.add_sub_agent_with_capabilities(agent, capabilities)?,
                None => supervisor.add_sub_agent(agent)?,
            }
        }
        Ok(supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_kernel::agent::error::ErrorCode;
    use mentat_kernel::agent::types::AgentStatus;
    use mentat_kernel::llm::types::{CompletionRequest, CompletionResponse};
    use mentat_kernel::usage::TokenUsage;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sub-agent answering after a delay, tracking peak concurrency.
    struct Worker {
        name: String,
        answer: Option<&'static str>,
        delay: Duration,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        inputs: Mutex<Vec<AgentInput>>,
    }

    impl Worker {
        fn new(name: &str, answer: Option<&'static str>) -> Self {
            Self {
                name: name.to_string(),
                answer,
                delay: Duration::from_millis(10),
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                inputs: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn sharing(mut self, running: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            self.running = running.clone();
            self.peak = peak.clone();
            self
        }
    }

    #[async_trait]
    impl Agent for Worker {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> Vec<String> {
            vec![self.name.clone()]
        }

        async fn invoke(&self, _ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
            self.inputs.lock().push(input);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            match self.answer {
                Some(answer) => Ok(AgentOutput::success(answer).with_token_usage(TokenUsage::new(10, 5))),
                None => Ok(AgentOutput::failed(&AgentError::ExecutionFailed("worker broke".into()))),
            }
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl LLMClient for Fixed {
        fn provider(&self) -> &str {
            "fixed"
        }
        async fn complete(
            &self,
            _ctx: &AgentContext,
            _request: CompletionRequest,
        ) -> AgentResult<CompletionResponse> {
            Ok(CompletionResponse::new(self.0).with_usage(TokenUsage::new(3, 2)))
        }
    }

    fn llm(reply: &'static str) -> Arc<dyn LLMClient> {
        Arc::new(Fixed(reply))
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_parallel_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let rules = RuleRouter::new();
        let mut builder = SupervisorAgent::builder()
            .with_llm(llm("unused"))
            .with_max_parallel(2);
        for i in 0..5 {
            let name = format!("w{i}");
            rules.add_rule(RoutingRule::when(name.clone(), |_| true));
            let worker = Worker::new(&name, Some("ok"))
                .with_delay(Duration::from_millis(100))
                .sharing(&running, &peak);
            builder = builder.with_sub_agent(Arc::new(worker));
        }
        let supervisor = builder.with_rules(rules).build().unwrap();

        let out = supervisor.invoke(&AgentContext::new(), "go".into()).await.unwrap();
        assert_eq!(out.status, AgentStatus::Success);
        assert_eq!(out.metadata["tasks_executed"], json!(5));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(out.token_usage.total_tokens, 75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_only_that_slot() {
        let supervisor = SupervisorAgent::builder()
            .with_llm(llm("unused"))
            .with_routing(RoutingStrategy::Capability)
            .with_sub_agent_timeout(Duration::from_millis(500))
            .with_sub_agent(Arc::new(Worker::new("fast", Some("quick answer"))))
            .with_sub_agent(Arc::new(
                Worker::new("slow", Some("late")).with_delay(Duration::from_secs(5)),
            ))
            .build()
            .unwrap();

        let out = supervisor
            .invoke(&AgentContext::new(), "ask the fast and the slow agents".into())
            .await
            .unwrap();
        assert_eq!(out.status, AgentStatus::Partial);
        assert_eq!(out.result["results"]["fast"]["result"], json!("quick answer"));
        assert!(out.result["results"].get("slow").is_none());
        assert!(out.metadata["failed_agents"]["slow"].as_str().unwrap().contains("timed out"));
        let failed_step = out
            .reasoning_steps
            .iter()
            .find(|s| s.action == "Delegate to slow")
            .unwrap();
        assert!(!failed_step.success);
    }

    #[tokio::test]
    async fn test_all_failed_is_failed() {
        let supervisor = SupervisorAgent::builder()
            .with_llm(llm("unused"))
            .with_routing(RoutingStrategy::RoundRobin)
            .with_sub_agent(Arc::new(Worker::new("broken", None)))
            .build()
            .unwrap();
        let out = supervisor.invoke(&AgentContext::new(), "x".into()).await.unwrap();
        assert_eq!(out.status, AgentStatus::Failed);
        assert_eq!(out.error.as_ref().map(|e| e.code), Some(ErrorCode::ExecutionFailed));
    }

    #[tokio::test]
    async fn test_hierarchy_threads_previous_outputs() {
        let first = Arc::new(Worker::new("search", Some("Paris")));
        let second = Arc::new(Worker::new("summary", Some("Paris it is")));
        let plan = r#"[{"agent": "search", "task": "find the city"}, {"agent": "summary", "task": "summarize"}]"#;
        let supervisor = SupervisorAgent::builder()
            .with_llm(llm(plan))
            .with_aggregation(AggregationStrategy::Hierarchy)
            .with_sub_agent(first.clone())
            .with_sub_agent(second.clone())
            .build()
            .unwrap();

        let out = supervisor.invoke(&AgentContext::new(), "city summary".into()).await.unwrap();
        assert_eq!(out.result["primary"], json!("Paris it is"));
        assert_eq!(out.metadata["earlier_outputs"], json!({"search": "Paris"}));
        assert_eq!(first.inputs.lock()[0].task, "find the city");
        let seen = &second.inputs.lock()[0];
        assert_eq!(seen.context[PREVIOUS_OUTPUTS_KEY], json!({"search": "Paris"}));
        // two sub-agents at 15 tokens each plus the routing call
        assert_eq!(out.token_usage.total_tokens, 35);
    }

    #[tokio::test]
    async fn test_best_picks_named_agent() {
        let supervisor = SupervisorAgent::builder()
            .with_llm(llm("weather"))
            .with_routing(RoutingStrategy::Capability)
            .with_aggregation(AggregationStrategy::Best)
            .with_sub_agent(Arc::new(Worker::new("search", Some("Paris"))))
            .with_sub_agent(Arc::new(Worker::new("weather", Some("Sunny"))))
            .build()
            .unwrap();
        let out = supervisor
            .invoke(&AgentContext::new(), "search the weather".into())
            .await
            .unwrap();
        assert_eq!(out.result, json!("Sunny"));
        assert_eq!(out.metadata["selected_agent"], json!("weather"));
    }

    #[test]
    fn test_sub_agent_registry() {
        let supervisor = SupervisorAgent::builder()
            .with_llm(llm("unused"))
            .with_sub_agent(Arc::new(Worker::new("a", Some("x"))))
            .build()
            .unwrap();
        let duplicate = supervisor.add_sub_agent(Arc::new(Worker::new("a", Some("y"))));
        assert!(matches!(duplicate, Err(AgentError::AlreadyExists(_))));
        supervisor
            .add_sub_agent_with_capabilities(Arc::new(Worker::new("b", Some("y"))), ["maps"])
            .unwrap();
        assert_eq!(supervisor.sub_agent_names(), vec!["a", "b"]);
        assert!(supervisor.remove_sub_agent("a").is_some());
        assert!(supervisor.remove_sub_agent("a").is_none());
        assert_eq!(supervisor.sub_agent_names(), vec!["b"]);
    }
}
