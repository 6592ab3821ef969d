//! 路由策略
//! Routing strategies
//!
//! A router turns the task and the sub-agent catalog into an ordered list
//! of [`Assignment`]s. Every assignment names an agent from the catalog.

use crate::agent::base::{ExecutionScope, is_fatal};
use async_trait::async_trait;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::AgentResult;
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 路由策略
/// Routing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    #[default]
    Llm,
    #[serde(alias = "rules")]
    Rule,
    #[serde(alias = "round")]
    RoundRobin,
    Capability,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::Llm => "llm",
            RoutingStrategy::Rule => "rule",
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::Capability => "capability",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 子 Agent 目录项
/// Catalog entry describing a sub-agent to a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// 子任务分配
/// A sub-task assigned to a named sub-agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub agent: String,
    pub task: String,
}

impl Assignment {
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
        }
    }
}

/// 路由器
/// Router contract
///
/// `catalog` is never empty. LLM-backed routers account their calls on
/// `scope`.
#[async_trait]
pub trait Router: Send + Sync {
    fn strategy(&self) -> RoutingStrategy;

    async fn route(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        catalog: &[AgentProfile],
    ) -> AgentResult<Vec<Assignment>>;
}

fn whole_task_to_first(task: &str, catalog: &[AgentProfile]) -> Vec<Assignment> {
    catalog
        .first()
        .map(|p| vec![Assignment::new(&p.name, task)])
        .unwrap_or_default()
}

// ============================================================================
// LLM 路由
// LLM routing
// ============================================================================

#[derive(Deserialize)]
struct PlannedTask {
    agent: String,
    #[serde(default, alias = "description", alias = "sub_task")]
    task: String,
}

/// LLM 路由器
/// Asks the model for a JSON decomposition of the task.
///
/// Unparseable plans and non-fatal LLM failures fall back to sending the
/// whole task to every sub-agent.
pub struct LlmRouter {
    llm: Arc<dyn LLMClient>,
}

impl LlmRouter {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Router for LlmRouter {
    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::Llm
    }

    async fn route(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        catalog: &[AgentProfile],
    ) -> AgentResult<Vec<Assignment>> {
        let agents = catalog
            .iter()
            .map(|p| {
                let mut line = format!("- {}", p.name);
                if !p.description.is_empty() {
                    line.push_str(&format!(": {}", p.description));
                }
                if !p.capabilities.is_empty() {
                    line.push_str(&format!(" (capabilities: {})", p.capabilities.join(", ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Decompose the following request into a concise, non-redundant list of sub-tasks and assign each one to an available agent.\n\nRequest: {task}\n\nAvailable agents:\n{agents}\n\nReturn a JSON array of objects with the fields \"agent\" (one of the agent names above) and \"task\" (the sub-task for that agent), in execution order."
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are a task decomposition expert. Respond with a valid, concise JSON array of tasks, and nothing else.",
            ),
            ChatMessage::user(prompt),
        ]);

        let plan = match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => parse_plan(&response.content, task, catalog),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "routing call failed, broadcasting task");
                Vec::new()
            }
        };
        if plan.is_empty() {
            return Ok(catalog.iter().map(|p| Assignment::new(&p.name, task)).collect());
        }
        Ok(plan)
    }
}

/// 解析路由计划
/// Parse a JSON plan, keeping assignments to known agents only. Duplicate
/// assignments are dropped and an empty sub-task means the whole task.
pub fn parse_plan(response: &str, task: &str, catalog: &[AgentProfile]) -> Vec<Assignment> {
    let trimmed = response.trim();
    let candidate = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };
    let planned: Vec<PlannedTask> = match serde_json::from_str(candidate) {
        Ok(planned) => planned,
        Err(e) => {
            tracing::warn!(error = %e, "routing plan is not a JSON array");
            return Vec::new();
        }
    };

    let mut plan: Vec<Assignment> = Vec::new();
    for entry in planned {
        let agent = entry.agent.trim();
        if !catalog.iter().any(|p| p.name == agent) {
            tracing::warn!(agent, "routing plan names an unknown agent");
            continue;
        }
        let sub_task = if entry.task.trim().is_empty() {
            task
        } else {
            entry.task.trim()
        };
        let assignment = Assignment::new(agent, sub_task);
        if !plan.contains(&assignment) {
            plan.push(assignment);
        }
    }
    plan
}

// ============================================================================
// 规则路由
// Rule routing
// ============================================================================

/// 路由条件
/// Condition a rule checks against the task text
#[derive(Clone)]
pub enum RuleCondition {
    /// Any keyword occurs in the task, case-insensitive
    Keywords(Vec<String>),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCondition::Keywords(k) => f.debug_tuple("Keywords").field(k).finish(),
            RuleCondition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// 路由规则
/// Routing rule; higher priorities are checked first
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub agent: String,
    pub priority: i32,
    pub condition: RuleCondition,
}

impl RoutingRule {
    pub fn keywords<I, S>(agent: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent: agent.into(),
            priority: 0,
            condition: RuleCondition::Keywords(
                keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
            ),
        }
    }

    pub fn when(agent: impl Into<String>, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            agent: agent.into(),
            priority: 0,
            condition: RuleCondition::Predicate(Arc::new(predicate)),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, task: &str) -> bool {
        match &self.condition {
            RuleCondition::Keywords(keywords) => {
                let lower = task.to_lowercase();
                keywords.iter().any(|k| lower.contains(k.as_str()))
            }
            RuleCondition::Predicate(predicate) => predicate(task),
        }
    }
}

/// 规则路由器
/// Keyword rule router
///
/// Every matching rule contributes its agent once, in priority order. With
/// no match the whole task goes to the first sub-agent.
#[derive(Debug, Default)]
pub struct RuleRouter {
    rules: RwLock<Vec<RoutingRule>>,
}

impl RuleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every rule of equal or higher priority.
    pub fn add_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write();
        let at = rules
            .iter()
            .position(|r| r.priority < rule.priority)
            .unwrap_or(rules.len());
        rules.insert(at, rule);
    }

    pub fn with_rule(self, rule: RoutingRule) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn rules(&self) -> Vec<RoutingRule> {
        self.rules.read().clone()
    }

    fn select(&self, task: &str, catalog: &[AgentProfile]) -> Vec<Assignment> {
        let mut plan: Vec<Assignment> = Vec::new();
        for rule in self.rules.read().iter() {
            if !rule.matches(task) || plan.iter().any(|a| a.agent == rule.agent) {
                continue;
            }
            if catalog.iter().any(|p| p.name == rule.agent) {
                plan.push(Assignment::new(&rule.agent, task));
            }
        }
        if plan.is_empty() {
            tracing::debug!("no routing rule matched, using the first sub-agent");
            return whole_task_to_first(task, catalog);
        }
        plan
    }
}

#[async_trait]
impl Router for RuleRouter {
    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::Rule
    }

    async fn route(
        &self,
        _ctx: &AgentContext,
        _scope: &ExecutionScope,
        task: &str,
        catalog: &[AgentProfile],
    ) -> AgentResult<Vec<Assignment>> {
        Ok(self.select(task, catalog))
    }
}

// ============================================================================
// 轮询路由
// Round-robin routing
// ============================================================================

/// 轮询路由器
/// Hands each task to the next sub-agent in registration order
#[derive(Debug, Default)]
pub struct RoundRobinRouter {
    next: AtomicUsize,
}

impl RoundRobinRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Router for RoundRobinRouter {
    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::RoundRobin
    }

    async fn route(
        &self,
        _ctx: &AgentContext,
        _scope: &ExecutionScope,
        task: &str,
        catalog: &[AgentProfile],
    ) -> AgentResult<Vec<Assignment>> {
        if catalog.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % catalog.len();
        Ok(vec![Assignment::new(&catalog[index].name, task)])
    }
}

// ============================================================================
// 能力路由
// Capability routing
// ============================================================================

/// 能力路由器
/// Routes to the sub-agents whose declared capabilities occur in the task,
/// most matches first. With no match the first sub-agent gets the task.
#[derive(Debug, Default)]
pub struct CapabilityRouter;

impl CapabilityRouter {
    pub fn new() -> Self {
        Self
    }

    /// Number of capabilities of `profile` mentioned in the task.
    pub fn score(task: &str, profile: &AgentProfile) -> usize {
        let lower = task.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        profile
            .capabilities
            .iter()
            .filter(|capability| {
                let capability = capability.to_lowercase();
                let phrase = capability.replace(['_', '-'], " ");
                lower.contains(&phrase)
                    || phrase
                        .split_whitespace()
                        .filter(|part| part.len() > 2)
                        .any(|part| words.contains(&part))
            })
            .count()
    }
}

#[async_trait]
impl Router for CapabilityRouter {
    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::Capability
    }

    async fn route(
        &self,
        _ctx: &AgentContext,
        _scope: &ExecutionScope,
        task: &str,
        catalog: &[AgentProfile],
    ) -> AgentResult<Vec<Assignment>> {
        let mut scored: Vec<(usize, &AgentProfile)> = catalog
            .iter()
            .map(|p| (Self::score(task, p), p))
            .filter(|(score, _)| *score > 0)
            .collect();
        if scored.is_empty() {
            return Ok(whole_task_to_first(task, catalog));
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .map(|(_, p)| Assignment::new(&p.name, task))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<AgentProfile> {
        [
            ("search", vec!["web_search", "lookup"]),
            ("weather", vec!["weather", "forecast"]),
            ("summary", vec!["summarize"]),
        ]
        .into_iter()
        .map(|(name, caps)| AgentProfile {
            name: name.to_string(),
            description: format!("{name} agent"),
            capabilities: caps.into_iter().map(String::from).collect(),
        })
        .collect()
    }

    #[test]
    fn test_parse_plan_filters_unknown_and_duplicates() {
        let reply = r#"Here is the plan:
[{"agent": "search", "task": "find the city"},
 {"agent": "ghost", "task": "haunt"},
 {"agent": "search", "task": "find the city"},
 {"agent": "summary", "task": ""}]"#;
        let plan = parse_plan(reply, "whole task", &catalog());
        assert_eq!(
            plan,
            vec![
                Assignment::new("search", "find the city"),
                Assignment::new("summary", "whole task"),
            ]
        );
        assert!(parse_plan("not json", "t", &catalog()).is_empty());
    }

    #[test]
    fn test_rule_priority_order() {
        let router = RuleRouter::new()
            .with_rule(RoutingRule::keywords("summary", ["summar"]).with_priority(1))
            .with_rule(RoutingRule::keywords("weather", ["weather", "sunny"]).with_priority(5))
            .with_rule(RoutingRule::keywords("missing", ["weather"]).with_priority(9))
            .with_rule(RoutingRule::when("search", |t| t.contains("Paris")).with_priority(5));

        let priorities: Vec<i32> = router.rules().iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![9, 5, 5, 1]);

        let plan = router.select("Summarize the weather in Paris", &catalog());
        let agents: Vec<&str> = plan.iter().map(|a| a.agent.as_str()).collect();
        assert_eq!(agents, vec!["weather", "search", "summary"]);

        let fallback = router.select("nothing relevant", &catalog());
        assert_eq!(fallback, vec![Assignment::new("search", "nothing relevant")]);
    }

    #[test]
    fn test_capability_score() {
        let profiles = catalog();
        assert_eq!(CapabilityRouter::score("What is the weather forecast?", &profiles[1]), 2);
        assert_eq!(CapabilityRouter::score("do a web search", &profiles[0]), 1);
        assert_eq!(CapabilityRouter::score("hello", &profiles[2]), 0);
    }
}
