//! 思维图 (Graph-of-Thought)
//! Graph-of-thought engine
//!
//! The task becomes the root of a DAG. Promising nodes are expanded into
//! follow-up thoughts, each scored and pruned, until `max_nodes` is
//! reached. The graph then executes in topological order, either one node
//! at a time or in parallel waves of equal depth, and the results of the
//! terminal nodes are merged into the answer.
//!
//! Node status is published on a `watch` channel; a node waits on its
//! dependencies' channels rather than polling them.

use super::heuristics::{Heuristics, parse_score};
use crate::agent::base::{AgentBase, ExecutionScope, is_fatal};
use crate::agent::prompt::render_task;
use async_trait::async_trait;
use futures::future::join_all;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use parking_lot::RwLock;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::Instrument;

/// Id of the node holding the task.
pub const ROOT_NODE_ID: &str = "root";

/// Nodes expanded per round.
const EXPANSIONS_PER_ROUND: usize = 3;
/// Thoughts requested per expansion.
const THOUGHTS_PER_NODE: usize = 3;
/// Extra edges linking a new node to related existing nodes.
const MAX_RELATED_EDGES: usize = 3;

/// 结果合并策略
/// How terminal node results are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Plurality of terminal results
    Vote,
    /// Score-weighted concatenation
    #[default]
    Weighted,
    /// Synthesis call
    Llm,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Vote => "vote",
            MergeStrategy::Weighted => "weighted",
            MergeStrategy::Llm => "llm",
        }
    }
}

/// 思考评分方式
/// How new thoughts are scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtEvaluation {
    #[default]
    Heuristic,
    Llm,
}

/// GoT 配置
/// GoT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoTConfig {
    pub name: String,
    pub description: String,
    pub max_nodes: usize,
    pub max_edges_per_node: usize,
    pub prune_threshold: f64,
    pub merge_strategy: MergeStrategy,
    /// Check for cycles before scheduling. A cyclic graph is never
    /// scheduled; this only makes the check explicit and early.
    pub cycle_detection: bool,
    pub parallel_execution: bool,
    pub node_timeout_ms: u64,
    pub max_concurrency: usize,
    pub evaluation: ThoughtEvaluation,
}

impl Default for GoTConfig {
    fn default() -> Self {
        Self {
            name: "got".to_string(),
            description: "Graph-of-thought reasoning agent".to_string(),
            max_nodes: 10,
            max_edges_per_node: 3,
            prune_threshold: 0.5,
            merge_strategy: MergeStrategy::Weighted,
            cycle_detection: true,
            parallel_execution: true,
            node_timeout_ms: 30_000,
            max_concurrency: 4,
            evaluation: ThoughtEvaluation::Heuristic,
        }
    }
}

impl GoTConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_nodes == 0 {
            return Err(AgentError::ConfigInvalid("got: max_nodes must be at least 1".into()));
        }
        if self.max_edges_per_node == 0 {
            return Err(AgentError::ConfigInvalid(
                "got: max_edges_per_node must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prune_threshold) {
            return Err(AgentError::ConfigInvalid(format!(
                "got: prune_threshold {} is outside [0, 1]",
                self.prune_threshold
            )));
        }
        if self.max_concurrency == 0 {
            return Err(AgentError::ConfigInvalid(
                "got: max_concurrency must be at least 1".into(),
            ));
        }
        if self.node_timeout_ms == 0 {
            return Err(AgentError::ConfigInvalid("got: node_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// 节点状态
/// Node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// 图节点
/// Thought graph node
#[derive(Debug)]
pub struct GraphNode {
    id: String,
    thought: String,
    score: f64,
    status: watch::Sender<NodeStatus>,
    result: RwLock<Option<String>>,
}

impl GraphNode {
    fn new(id: impl Into<String>, thought: impl Into<String>, score: f64) -> Self {
        let (status, _) = watch::channel(NodeStatus::Pending);
        Self {
            id: id.into(),
            thought: thought.into(),
            score,
            status,
            result: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn thought(&self) -> &str {
        &self.thought
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn result(&self) -> Option<String> {
        self.result.read().clone()
    }

    fn set_status(&self, status: NodeStatus) {
        self.status.send_replace(status);
    }

    fn complete(&self, result: String) {
        *self.result.write() = Some(result);
        self.set_status(NodeStatus::Completed);
    }

    /// Wait until the node is completed or failed.
    async fn settled(&self) -> NodeStatus {
        let mut rx = self.status.subscribe();
        match rx
            .wait_for(|s| matches!(s, NodeStatus::Completed | NodeStatus::Failed))
            .await
        {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }
}

/// 思维图
/// Thought graph; edges run from a dependency to its dependent
#[derive(Debug)]
pub struct ThoughtGraph {
    graph: DiGraph<GraphNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl ThoughtGraph {
    /// Graph holding only the root node for `task`, scored 1.0.
    pub fn new(task: impl Into<String>) -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(GraphNode::new(ROOT_NODE_ID, task, 1.0));
        Self {
            graph,
            index: HashMap::from([(ROOT_NODE_ID.to_string(), root)]),
        }
    }

    pub fn root(&self) -> &GraphNode {
        &self.graph[self.index[ROOT_NODE_ID]]
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    pub fn add_node(&mut self, id: impl Into<String>, thought: impl Into<String>, score: f64) -> AgentResult<()> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(AgentError::AlreadyExists(format!("graph node {id}")));
        }
        let idx = self.graph.add_node(GraphNode::new(id.clone(), thought, score));
        self.index.insert(id, idx);
        Ok(())
    }

    /// Make `dependent` depend on `dependency`. Repeated edges are merged.
    ///
    /// Edges that close a cycle are accepted here; a cyclic graph fails with
    /// `CycleDetected` when it is scheduled.
    pub fn add_dependency(&mut self, dependency: &str, dependent: &str) -> AgentResult<()> {
        let from = self.lookup(dependency)?;
        let to = self.lookup(dependent)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    fn lookup(&self, id: &str) -> AgentResult<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AgentError::NotFound(format!("graph node {id}")))
    }

    fn dependencies_of(&self, idx: NodeIndex) -> Vec<&GraphNode> {
        let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
        deps.sort();
        deps.into_iter().map(|d| &self.graph[d]).collect()
    }

    pub fn dependencies(&self, id: &str) -> Vec<&GraphNode> {
        self.index
            .get(id)
            .map(|&idx| self.dependencies_of(idx))
            .unwrap_or_default()
    }

    pub fn dependents_count(&self, id: &str) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    /// 检测环
    /// Id of a node on a cycle, if any
    pub fn find_cycle(&self) -> Option<String> {
        toposort(&self.graph, None)
            .err()
            .map(|cycle| self.graph[cycle.node_id()].id.clone())
    }

    fn order(&self) -> AgentResult<Vec<NodeIndex>> {
        toposort(&self.graph, None)
            .map_err(|cycle| AgentError::cycle_detected(self.graph[cycle.node_id()].id.clone()))
    }

    /// Node ids in a topological order of the dependency relation.
    pub fn topological_order(&self) -> AgentResult<Vec<String>> {
        Ok(self
            .order()?
            .into_iter()
            .map(|idx| self.graph[idx].id.clone())
            .collect())
    }

    /// Group a topological order by dependency depth.
    fn waves(&self, order: &[NodeIndex]) -> Vec<Vec<NodeIndex>> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<NodeIndex>> = Vec::new();
        for &idx in order {
            let d = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, d);
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(idx);
        }
        waves
    }

    /// Ids of each wave, for inspection.
    pub fn wave_ids(&self) -> AgentResult<Vec<Vec<String>>> {
        let order = self.order()?;
        Ok(self
            .waves(&order)
            .into_iter()
            .map(|wave| wave.into_iter().map(|idx| self.graph[idx].id.clone()).collect())
            .collect())
    }

    /// Nodes without dependents, in insertion order.
    pub fn terminals(&self) -> Vec<&GraphNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }
}

/// 思维图 Agent
/// Graph-of-thought agent
pub struct GoTAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    heuristics: Heuristics,
    config: GoTConfig,
}

impl GoTAgent {
    pub fn builder() -> GoTAgentBuilder {
        GoTAgentBuilder::default()
    }

    pub fn config(&self) -> &GoTConfig {
        &self.config
    }

    /// 执行调用方构建的图
    /// Execute a caller-built graph without expanding it
    pub async fn invoke_graph(
        &self,
        ctx: &AgentContext,
        input: AgentInput,
        graph: ThoughtGraph,
    ) -> AgentResult<AgentOutput> {
        let scope = self.base.begin(&input, false).await?;
        let task = render_task(&input);
        let result = self
            .execute_graph(ctx, &scope, &task, &graph)
            .instrument(scope.span())
            .await;
        scope.finish(result).await
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
        let task = render_task(input);
        let mut graph = ThoughtGraph::new(task.clone());
        if let Err(e) = self.build_graph(ctx, scope, &task, &mut graph).await {
            return scope.fail(e, None);
        }
        tracing::debug!(nodes = graph.len(), "thought graph built");
        self.execute_graph(ctx, scope, &task, &graph).await
    }

    async fn execute_graph(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &ThoughtGraph,
    ) -> AgentResult<AgentOutput> {
        if self.config.cycle_detection
            && let Some(node) = graph.find_cycle()
        {
            return scope.fail(AgentError::cycle_detected(node), None);
        }
        let order = match graph.order() {
            Ok(order) => order,
            Err(e) => return scope.fail(e, None),
        };
        let order_ids: Vec<&str> = order.iter().map(|&idx| graph.graph[idx].id()).collect();
        scope.set_metadata("execution_order", json!(order_ids));

        let executed = if self.config.parallel_execution {
            self.run_waves(ctx, scope, task, graph, &order).await
        } else {
            self.run_sequential(ctx, scope, task, graph, &order).await
        };
        if let Err(e) = executed {
            return scope.fail(e, None);
        }

        let answer = match self.merge(ctx, scope, task, graph).await {
            Ok(answer) => answer,
            Err(e) => return scope.fail(e, None),
        };
        scope.set_metadata("total_nodes", json!(graph.len()));
        scope.set_metadata("merge_strategy", json!(self.config.merge_strategy.as_str()));
        scope.set_metadata("parallel_execution", json!(self.config.parallel_execution));
        Ok(scope.succeed(answer, "graph of thought complete"))
    }

    // ------------------------------------------------------------------
    // Graph construction
    // ------------------------------------------------------------------

    async fn build_graph(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &mut ThoughtGraph,
    ) -> AgentResult<()> {
        let mut expanded: HashSet<String> = HashSet::new();
        let mut next_id = 1usize;

        while graph.len() < self.config.max_nodes {
            let candidates = self.candidates(graph, &expanded);
            if candidates.is_empty() {
                break;
            }
            for parent in candidates {
                if graph.len() >= self.config.max_nodes {
                    break;
                }
                expanded.insert(parent.clone());
                let room = self
                    .config
                    .max_edges_per_node
                    .saturating_sub(graph.dependents_count(&parent));
                let parent_thought = graph
                    .node(&parent)
                    .map(|n| n.thought().to_string())
                    .unwrap_or_default();

                let thoughts = self.generate_thoughts(ctx, scope, task, &parent_thought).await?;
                for thought in thoughts.into_iter().take(room) {
                    if graph.len() >= self.config.max_nodes {
                        break;
                    }
                    let score = self.evaluate(ctx, scope, task, &thought).await?;
                    if score < self.config.prune_threshold {
                        tracing::debug!(score, "thought pruned");
                        continue;
                    }
                    let id = format!("node_{next_id}");
                    next_id += 1;
                    graph.add_node(id.clone(), thought.clone(), score)?;
                    graph.add_dependency(&parent, &id)?;
                    let related = self.link_related(graph, &id, &parent)?;
                    scope.step(
                        format!("Graph Node ({id})"),
                        thought,
                        json!({ "score": score, "parent": parent, "related": related }),
                    );
                }
            }
        }
        Ok(())
    }

    /// Pending nodes above the threshold with room for dependents, best first.
    fn candidates(&self, graph: &ThoughtGraph, expanded: &HashSet<String>) -> Vec<String> {
        let mut candidates: Vec<&GraphNode> = graph
            .nodes()
            .filter(|n| n.status() == NodeStatus::Pending)
            .filter(|n| n.score() >= self.config.prune_threshold)
            .filter(|n| graph.dependents_count(n.id()) < self.config.max_edges_per_node)
            .filter(|n| !expanded.contains(n.id()))
            .collect();
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
        candidates
            .into_iter()
            .take(EXPANSIONS_PER_ROUND)
            .map(|n| n.id().to_string())
            .collect()
    }

    /// Connect a new node to existing nodes sharing a relation keyword.
    fn link_related(&self, graph: &mut ThoughtGraph, id: &str, parent: &str) -> AgentResult<Vec<String>> {
        let Some(thought) = graph.node(id).map(|n| n.thought().to_string()) else {
            return Ok(Vec::new());
        };
        let related: Vec<String> = graph
            .nodes()
            .filter(|n| n.id() != id && n.id() != parent && n.id() != ROOT_NODE_ID)
            .filter(|n| graph.dependents_count(n.id()) < self.config.max_edges_per_node)
            .filter(|n| self.heuristics.are_related(n.thought(), &thought))
            .take(MAX_RELATED_EDGES)
            .map(|n| n.id().to_string())
            .collect();
        for other in &related {
            graph.add_dependency(other, id)?;
        }
        Ok(related)
    }

    async fn generate_thoughts(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        parent: &str,
    ) -> AgentResult<Vec<String>> {
        let prompt = format!(
            "Task: {task}\n\nCurrent thought: {parent}\n\nGenerate 2-3 distinct follow-up thoughts that advance the reasoning.\nWrite each thought on its own numbered line."
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => Ok(self.heuristics.parse_thoughts(&response.content, THOUGHTS_PER_NODE)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "thought generation failed, node left unexpanded");
                Ok(Vec::new())
            }
        }
    }

    async fn evaluate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        thought: &str,
    ) -> AgentResult<f64> {
        if self.config.evaluation == ThoughtEvaluation::Heuristic {
            return Ok(self.heuristic_score(task, thought));
        }
        let prompt = format!(
            "Rate how useful this thought is for solving the task, from 0 to 1. Reply with the number only.\n\nTask: {task}\nThought: {thought}"
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]).temperature(0.0);
        match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => Ok(parse_score(&response.content).unwrap_or(0.5)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "thought evaluation failed, using heuristic score");
                Ok(self.heuristic_score(task, thought))
            }
        }
    }

    /// 快速启发式评分
    /// Length band, task-word overlap and reasoning words
    fn heuristic_score(&self, task: &str, thought: &str) -> f64 {
        let mut score = 0.5;
        let len = thought.chars().count();
        if (20..=500).contains(&len) {
            score += 0.15;
        } else if len < 10 {
            score -= 0.2;
        }

        let task_words: HashSet<String> = task
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.chars().count() > 3)
            .map(str::to_string)
            .collect();
        if !task_words.is_empty() {
            let lower = thought.to_lowercase();
            let overlap = task_words.iter().filter(|w| lower.contains(w.as_str())).count();
            score += 0.2 * overlap as f64 / task_words.len() as f64;
        }
        if self.heuristics.count_reasoning_words(thought) > 0 {
            score += 0.05;
        }
        score.clamp(0.0, 1.0)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn run_sequential(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &ThoughtGraph,
        order: &[NodeIndex],
    ) -> AgentResult<()> {
        for &idx in order {
            self.process_node(ctx, scope, task, graph, idx, None).await?;
        }
        Ok(())
    }

    async fn run_waves(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &ThoughtGraph,
        order: &[NodeIndex],
    ) -> AgentResult<()> {
        let semaphore = Semaphore::new(self.config.max_concurrency);
        for (depth, wave) in graph.waves(order).into_iter().enumerate() {
            tracing::debug!(depth, width = wave.len(), "executing graph wave");
            let results = join_all(
                wave.iter()
                    .map(|&idx| self.process_node(ctx, scope, task, graph, idx, Some(&semaphore))),
            )
            .await;
            // fatal errors win over ordinary node failures
            let mut first_error = None;
            for result in results {
                if let Err(e) = result {
                    if is_fatal(&e) {
                        return Err(e);
                    }
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn process_node(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &ThoughtGraph,
        idx: NodeIndex,
        semaphore: Option<&Semaphore>,
    ) -> AgentResult<()> {
        let node = &graph.graph[idx];
        let span = tracing::info_span!("got.node", node = %node.id);
        async {
            let deps = graph.dependencies_of(idx);
            for dep in &deps {
                let status = ctx.guard(async { Ok(dep.settled().await) }).await?;
                if status != NodeStatus::Completed {
                    node.set_status(NodeStatus::Failed);
                    return Err(AgentError::ExecutionFailed(format!(
                        "dependency {} of node {} did not complete",
                        dep.id, node.id
                    )));
                }
            }

            let _permit = match semaphore {
                Some(semaphore) => Some(
                    ctx.guard(async {
                        semaphore
                            .acquire()
                            .await
                            .map_err(|_| AgentError::Internal("graph semaphore closed".into()))
                    })
                    .await?,
                ),
                None => None,
            };
            node.set_status(NodeStatus::Processing);

            let mut prompt = format!("Task: {task}\n\n");
            if !deps.is_empty() {
                prompt.push_str("Results of prior thoughts:\n");
                for dep in &deps {
                    let _ = writeln!(prompt, "- {}: {}", dep.thought, dep.result().unwrap_or_default());
                }
                prompt.push('\n');
            }
            let _ = write!(prompt, "Develop this thought into a concise result:\n{}", node.thought);

            let node_ctx = ctx
                .child()
                .with_timeout(Duration::from_millis(self.config.node_timeout_ms));
            let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
            match scope.llm(&node_ctx, self.llm.as_ref(), request).await {
                Ok(response) => {
                    node.complete(response.content.trim().to_string());
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(node = %node.id, error = %e, "graph node failed");
                    node.set_status(NodeStatus::Failed);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    async fn merge(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        graph: &ThoughtGraph,
    ) -> AgentResult<String> {
        let terminals: Vec<(&GraphNode, String)> = graph
            .terminals()
            .into_iter()
            .filter_map(|n| n.result().map(|r| (n, r)))
            .collect();
        match terminals.len() {
            0 => return Ok(graph.root().result().unwrap_or_default()),
            1 => return Ok(terminals[0].1.clone()),
            _ => {}
        }

        match self.config.merge_strategy {
            MergeStrategy::Vote => {
                let mut counts: Vec<(String, usize, &str)> = Vec::new();
                for (_, result) in &terminals {
                    let key = result.trim().to_lowercase();
                    match counts.iter_mut().find(|(k, _, _)| *k == key) {
                        Some(entry) => entry.1 += 1,
                        None => counts.push((key, 1, result.as_str())),
                    }
                }
                // first result wins a tie
                let best = counts
                    .iter()
                    .fold(None::<&(String, usize, &str)>, |best, entry| match best {
                        Some(b) if b.1 >= entry.1 => Some(b),
                        _ => Some(entry),
                    });
                Ok(best.map(|b| b.2.to_string()).unwrap_or_default())
            }
            MergeStrategy::Weighted => {
                let mut weighted = terminals.clone();
                weighted.sort_by(|a, b| b.0.score().total_cmp(&a.0.score()));
                let mut merged = String::from("Combined insights from multiple reasoning paths:\n\n");
                for (node, result) in weighted {
                    let _ = writeln!(merged, "[Weight: {:.2}] {result}", node.score());
                }
                Ok(merged.trim_end().to_string())
            }
            MergeStrategy::Llm => {
                let mut prompt = format!(
                    "Task: {task}\n\nSynthesize these results from different reasoning paths into one final answer:\n\n"
                );
                for (i, (node, result)) in terminals.iter().enumerate() {
                    let _ = writeln!(prompt, "{}. [score {:.2}] {result}", i + 1, node.score());
                }
                let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
                let response = scope.llm(ctx, self.llm.as_ref(), request).await?;
                Ok(response.content.trim().to_string())
            }
        }
    }
}

#[async_trait]
impl Agent for GoTAgent {
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

/// GoT Agent 构建器
/// GoT agent builder
#[derive(Default)]
pub struct GoTAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    callbacks: Vec<Arc<dyn Callback>>,
    heuristics: Option<Heuristics>,
    config: GoTConfig,
}

impl GoTAgentBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = Some(heuristics);
        self
    }

    pub fn with_config(mut self, config: GoTConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.config.max_nodes = max_nodes;
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.config.merge_strategy = strategy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.config.parallel_execution = parallel;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn with_evaluation(mut self, evaluation: ThoughtEvaluation) -> Self {
        self.config.evaluation = evaluation;
        self
    }

    pub fn build(self) -> AgentResult<GoTAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("got: LLM client not set".to_string()))?;
        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["graph_of_thought", "reasoning", "parallel"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(GoTAgent {
            base,
            llm,
            heuristics: self.heuristics.unwrap_or_default(),
            config: self.config,
        })
    }
}
