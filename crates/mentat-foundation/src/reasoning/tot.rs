//! 思维树 (Tree-of-Thought)
//! Tree-of-thought engine
//!
//! Candidate next steps are generated from each frontier node, scored, and
//! pruned below `prune_threshold`. The search stops as soon as a node is
//! judged to be a complete solution; otherwise the best surviving node is
//! used. The answer is the reasoning path from the root to that node.

use super::heuristics::{Heuristics, parse_score};
use crate::agent::base::{AgentBase, ExecutionScope, is_fatal};
use crate::agent::prompt::render_task;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::Instrument;

/// Score assumed when an LLM rating is missing or unreadable.
const NEUTRAL_SCORE: f64 = 0.5;

/// 搜索策略
/// Tree search strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Beam,
    #[serde(alias = "dfs")]
    DepthFirst,
    #[serde(alias = "bfs")]
    BreadthFirst,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Beam => "beam",
            SearchStrategy::DepthFirst => "depth_first",
            SearchStrategy::BreadthFirst => "breadth_first",
        }
    }
}

/// 评估方法
/// How candidate thoughts are scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMethod {
    #[default]
    Heuristic,
    Llm,
    /// Mean of the heuristic and LLM scores
    Hybrid,
}

/// ToT 配置
/// Tree-of-thought configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToTConfig {
    pub name: String,
    pub description: String,
    pub max_depth: usize,
    pub branching_factor: usize,
    /// Frontier size for beam search, 0 means `branching_factor`
    pub beam_width: usize,
    pub strategy: SearchStrategy,
    pub evaluation: EvaluationMethod,
    pub prune_threshold: f64,
    /// Ask the LLM whether each node already solves the task
    pub solution_check: bool,
}

impl Default for ToTConfig {
    fn default() -> Self {
        Self {
            name: "tot".to_string(),
            description: "Tree-of-thought reasoning agent".to_string(),
            max_depth: 3,
            branching_factor: 3,
            beam_width: 0,
            strategy: SearchStrategy::Beam,
            evaluation: EvaluationMethod::Heuristic,
            prune_threshold: 0.3,
            solution_check: true,
        }
    }
}

impl ToTConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_depth == 0 || self.branching_factor == 0 {
            return Err(AgentError::ConfigInvalid(
                "tot: max_depth and branching_factor must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prune_threshold) {
            return Err(AgentError::ConfigInvalid(format!(
                "tot: prune_threshold {} is outside [0, 1]",
                self.prune_threshold
            )));
        }
        Ok(())
    }

    pub fn effective_beam_width(&self) -> usize {
        if self.beam_width == 0 {
            self.branching_factor
        } else {
            self.beam_width
        }
    }
}

/// 思维树节点
/// Node of the thought tree
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtNode {
    pub id: String,
    pub thought: String,
    pub score: f64,
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Scored below the prune threshold
    pub pruned: bool,
}

/// 思维树 (arena)
/// Arena-allocated thought tree; index 0 is the root holding the task.
#[derive(Debug, Clone)]
pub struct ThoughtTree {
    nodes: Vec<ThoughtNode>,
}

impl ThoughtTree {
    pub const ROOT: usize = 0;

    pub fn new(task: impl Into<String>) -> Self {
        Self {
            nodes: vec![ThoughtNode {
                id: "root".to_string(),
                thought: task.into(),
                score: 1.0,
                depth: 0,
                parent: None,
                children: Vec::new(),
                pruned: false,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &ThoughtNode {
        &self.nodes[index]
    }

    fn add_child(&mut self, parent: usize, thought: String, score: f64, pruned: bool) -> usize {
        let index = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        let ordinal = self.nodes[parent].children.len();
        let id = format!("{}_{depth}_{ordinal}", self.nodes[parent].id);
        self.nodes.push(ThoughtNode {
            id,
            thought,
            score,
            depth,
            parent: Some(parent),
            children: Vec::new(),
            pruned,
        });
        self.nodes[parent].children.push(index);
        index
    }

    /// Thoughts from the first step down to `index`, root excluded.
    pub fn path(&self, index: usize) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            if i != Self::ROOT {
                path.push(self.nodes[i].thought.as_str());
            }
            current = self.nodes[i].parent;
        }
        path.reverse();
        path
    }

    /// Highest-scoring surviving node; ties go to the deeper node, then to
    /// the earlier one.
    pub fn best(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, node) in self.nodes.iter().enumerate().skip(1) {
            if node.pruned {
                continue;
            }
            let better = best.is_none_or(|b| {
                let current = &self.nodes[b];
                node.score > current.score || (node.score == current.score && node.depth > current.depth)
            });
            if better {
                best = Some(i);
            }
        }
        best
    }

    fn context(&self, index: usize) -> String {
        self.path(index)
            .iter()
            .map(|t| format!("→ {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of a search: the node reached and whether it was judged a solution.
struct SearchOutcome {
    node: usize,
    solved: bool,
}

/// 思维树 Agent
/// Tree-of-thought agent
pub struct ToTAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    heuristics: Heuristics,
    config: ToTConfig,
}

impl ToTAgent {
    pub fn builder() -> ToTAgentBuilder {
        ToTAgentBuilder::default()
    }

    pub fn config(&self) -> &ToTConfig {
        &self.config
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
        let mut tree = ThoughtTree::new(task.clone());

        let searched = match self.config.strategy {
            SearchStrategy::Beam => self.beam_search(ctx, scope, &task, &mut tree).await,
            SearchStrategy::DepthFirst => {
                self.depth_first(ctx, scope, &task, &mut tree, ThoughtTree::ROOT).await
            }
            SearchStrategy::BreadthFirst => self.breadth_first(ctx, scope, &task, &mut tree).await,
        };
        let solution = match searched {
            Ok(Some(index)) => Some(SearchOutcome { node: index, solved: true }),
            Ok(None) => tree.best().map(|node| SearchOutcome { node, solved: false }),
            Err(e) => return scope.fail(e, None),
        };

        scope.set_metadata("total_nodes_explored", json!(tree.len()));
        scope.set_metadata("search_strategy", json!(self.config.strategy.as_str()));
        let Some(outcome) = solution else {
            return scope.fail(
                AgentError::ExecutionFailed("no reasoning path survived pruning".into()),
                None,
            );
        };

        let path = tree.path(outcome.node);
        let mut answer = String::from("Based on tree-of-thought reasoning:\n\n");
        for (i, step) in path.iter().enumerate() {
            let _ = writeln!(answer, "Step {}: {step}", i + 1);
        }
        if outcome.solved {
            let _ = write!(answer, "\nFinal Answer: {}", tree.node(outcome.node).thought);
        }

        scope.set_metadata("solution_path", json!(path));
        scope.set_metadata("solution_depth", json!(tree.node(outcome.node).depth));
        scope.set_metadata("solution_found", json!(outcome.solved));
        Ok(scope.succeed(answer, "tree-of-thought complete"))
    }

    /// 束搜索
    /// Keep the best `beam_width` survivors of each level
    async fn beam_search(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &mut ThoughtTree,
    ) -> AgentResult<Option<usize>> {
        let width = self.config.effective_beam_width();
        let mut beam = vec![ThoughtTree::ROOT];

        for depth in 0..self.config.max_depth {
            if beam.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for &node in &beam {
                if self.is_solution(ctx, scope, task, tree, node).await? {
                    return Ok(Some(node));
                }
                for child in self.expand(ctx, scope, task, tree, node).await? {
                    scope.step(
                        format!("Thought (depth={})", depth + 1),
                        tree.node(child).thought.clone(),
                        json!(format!("Score: {:.2}", tree.node(child).score)),
                    );
                    next.push(child);
                }
            }
            next.sort_by(|a, b| tree.node(*b).score.total_cmp(&tree.node(*a).score));
            next.truncate(width);
            beam = next;
        }

        for &node in &beam {
            if self.is_solution(ctx, scope, task, tree, node).await? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// 深度优先搜索
    /// Depth-first search, returning the first node judged a solution
    fn depth_first<'a>(
        &'a self,
        ctx: &'a AgentContext,
        scope: &'a ExecutionScope,
        task: &'a str,
        tree: &'a mut ThoughtTree,
        node: usize,
    ) -> BoxFuture<'a, AgentResult<Option<usize>>> {
        async move {
            if self.is_solution(ctx, scope, task, tree, node).await? {
                return Ok(Some(node));
            }
            if tree.node(node).depth >= self.config.max_depth {
                return Ok(None);
            }
            for child in self.expand(ctx, scope, task, tree, node).await? {
                let explored = tree.node(child);
                scope.step(
                    format!("Explore (DFS, depth={})", explored.depth),
                    explored.thought.clone(),
                    json!(format!("Score: {:.2}", explored.score)),
                );
                if let Some(found) = self.depth_first(ctx, scope, task, tree, child).await? {
                    return Ok(Some(found));
                }
            }
            Ok(None)
        }
        .boxed()
    }

    /// 广度优先搜索
    /// Breadth-first search, level by level
    async fn breadth_first(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &mut ThoughtTree,
    ) -> AgentResult<Option<usize>> {
        let mut queue = VecDeque::from([ThoughtTree::ROOT]);
        while let Some(node) = queue.pop_front() {
            if self.is_solution(ctx, scope, task, tree, node).await? {
                return Ok(Some(node));
            }
            if tree.node(node).depth >= self.config.max_depth {
                continue;
            }
            for child in self.expand(ctx, scope, task, tree, node).await? {
                let explored = tree.node(child);
                scope.step(
                    format!("Explore (BFS, depth={})", explored.depth),
                    explored.thought.clone(),
                    json!(format!("Score: {:.2}", explored.score)),
                );
                queue.push_back(child);
            }
        }
        Ok(None)
    }

    /// Generate, score and attach children of `parent`; returns the ones
    /// that survived pruning.
    async fn expand(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &mut ThoughtTree,
        parent: usize,
    ) -> AgentResult<Vec<usize>> {
        ctx.check()?;
        let prompt = format!(
            "Problem: {task}\n\nCurrent reasoning path:\n{}\n\nCurrent state: {}\n\nGenerate {} different possible next steps in the reasoning process.\nEach step should:\n1. Be logically connected to the current state\n2. Make progress toward solving the problem\n3. Be distinct from other steps\n\nFormat your response as:\nStep 1: [thought]\nStep 2: [thought]\n...",
            tree.context(parent),
            tree.node(parent).thought,
            self.config.branching_factor,
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are generating possible next steps in a reasoning tree. Generate diverse and logical continuations.",
            ),
            ChatMessage::user(prompt),
        ]);
        let thoughts = match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => self
                .heuristics
                .parse_thoughts(&response.content, self.config.branching_factor),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(node = %tree.node(parent).id, error = %e, "thought generation failed");
                Vec::new()
            }
        };

        let mut survivors = Vec::new();
        for thought in thoughts {
            let score = self.evaluate(ctx, scope, task, tree, parent, &thought).await?;
            let pruned = score < self.config.prune_threshold;
            let child = tree.add_child(parent, thought, score, pruned);
            if pruned {
                tracing::debug!(node = %tree.node(child).id, score, "thought pruned");
            } else {
                survivors.push(child);
            }
        }
        Ok(survivors)
    }

    async fn evaluate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &ThoughtTree,
        parent: usize,
        thought: &str,
    ) -> AgentResult<f64> {
        let score = match self.config.evaluation {
            EvaluationMethod::Heuristic => heuristic_score(task, tree, parent, thought),
            EvaluationMethod::Llm => self.llm_score(ctx, scope, task, tree, parent, thought).await?,
            EvaluationMethod::Hybrid => {
                let llm = self.llm_score(ctx, scope, task, tree, parent, thought).await?;
                (llm + heuristic_score(task, tree, parent, thought)) / 2.0
            }
        };
        Ok(score)
    }

    async fn llm_score(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &ThoughtTree,
        parent: usize,
        thought: &str,
    ) -> AgentResult<f64> {
        let prompt = format!(
            "Evaluate this reasoning step for solving the problem:\nProblem: {task}\nCurrent thought: {thought}\nPrevious context: {}\n\nRate this thought from 0 to 1 based on:\n1. Logical correctness\n2. Progress toward solution\n3. Clarity and coherence\n\nRespond with just a number between 0 and 1.",
            tree.context(parent),
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => Ok(parse_score(&response.content).unwrap_or(NEUTRAL_SCORE)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "thought evaluation failed, using neutral score");
                Ok(NEUTRAL_SCORE)
            }
        }
    }

    /// The root holds the bare task and is never a solution.
    async fn is_solution(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        tree: &ThoughtTree,
        node: usize,
    ) -> AgentResult<bool> {
        if !self.config.solution_check || node == ThoughtTree::ROOT {
            return Ok(false);
        }
        let prompt = format!(
            "Given this problem: {task}\n\nAnd this reasoning path:\n{}\n\nCurrent thought: {}\n\nHas a complete solution been reached? Answer only 'yes' or 'no'.",
            tree.context(node),
            tree.node(node).thought,
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        match scope.llm(ctx, self.llm.as_ref(), request).await {
            Ok(response) => Ok(response.content.trim().to_lowercase().contains("yes")),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(node = %tree.node(node).id, error = %e, "solution check failed");
                Ok(false)
            }
        }
    }
}

/// 启发式评分
/// Length, task-term overlap, and repetition of the parent thought
fn heuristic_score(task: &str, tree: &ThoughtTree, parent: usize, thought: &str) -> f64 {
    let mut score = 0.5;
    let length = thought.chars().count();
    if length < 20 {
        score -= 0.2;
    }
    if length > 100 {
        score += 0.1;
    }

    let task_lower = task.to_lowercase();
    let thought_lower = thought.to_lowercase();
    let task_words: Vec<&str> = task_lower.split_whitespace().collect();
    if !task_words.is_empty() {
        let thought_words: Vec<&str> = thought_lower.split_whitespace().collect();
        let matches = task_words.iter().filter(|w| thought_words.contains(w)).count();
        score += matches as f64 / task_words.len() as f64 * 0.2;
    }

    if parent != ThoughtTree::ROOT && thought.contains(tree.node(parent).thought.as_str()) {
        score -= 0.3;
    }
    score.clamp(0.0, 1.0)
}

#[async_trait]
impl Agent for ToTAgent {
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

/// ToT Agent 构建器
/// Tree-of-thought agent builder
#[derive(Default)]
pub struct ToTAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    callbacks: Vec<Arc<dyn Callback>>,
    heuristics: Option<Heuristics>,
    config: ToTConfig,
}

impl ToTAgentBuilder {
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

    pub fn with_config(mut self, config: ToTConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationMethod) -> Self {
        self.config.evaluation = evaluation;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn with_branching_factor(mut self, branching: usize) -> Self {
        self.config.branching_factor = branching;
        self
    }

    pub fn with_beam_width(mut self, width: usize) -> Self {
        self.config.beam_width = width;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.config.prune_threshold = threshold;
        self
    }

    pub fn build(self) -> AgentResult<ToTAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("tot: LLM client not set".to_string()))?;
        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["tree_of_thought", "search", "reasoning"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(ToTAgent {
            base,
            llm,
            heuristics: self.heuristics.unwrap_or_default(),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_kernel::agent::error::ErrorCode;
    use mentat_kernel::agent::types::AgentStatus;
    use mentat_kernel::llm::types::CompletionResponse;
    use parking_lot::Mutex;

    type Reply = dyn Fn(&str, usize) -> String + Send + Sync;

    /// Replies computed from the prompt and the number of earlier calls.
    struct Scripted {
        reply: Box<Reply>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(reply: impl Fn(&str, usize) -> String + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMClient for Scripted {
        fn provider(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _ctx: &AgentContext,
            request: CompletionRequest,
        ) -> AgentResult<CompletionResponse> {
            let n = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            Ok(CompletionResponse::new((self.reply)(&request.prompt_text(), n)))
        }
    }

    const TASK: &str = "How can we reduce energy costs in an office building";

    /// Distinct, on-topic thoughts so heuristic scoring keeps them.
    fn distinct_thoughts(prompt: &str, n: usize) -> String {
        if prompt.contains("Has a complete solution") {
            return "no".to_string();
        }
        format!(
            "Step 1: Audit office building energy costs, variant {n}a\nStep 2: Reduce energy costs with smart lighting, variant {n}b"
        )
    }

    #[test]
    fn test_heuristic_score() {
        let mut tree = ThoughtTree::new(TASK);
        let short = heuristic_score(TASK, &tree, ThoughtTree::ROOT, "ok");
        let on_topic = heuristic_score(TASK, &tree, ThoughtTree::ROOT, "Reduce energy costs in the office building");
        assert!(short < 0.5);
        assert!(on_topic > 0.5);

        let parent = tree.add_child(ThoughtTree::ROOT, "insulate the roof".into(), 0.6, false);
        let repeated = heuristic_score(TASK, &tree, parent, "insulate the roof and insulate the roof again");
        let fresh = heuristic_score(TASK, &tree, parent, "replace the windows with double glazing");
        assert!(repeated < fresh);
    }

    #[test]
    fn test_tree_path_and_best() {
        let mut tree = ThoughtTree::new("task");
        let a = tree.add_child(ThoughtTree::ROOT, "a".into(), 0.6, false);
        let b = tree.add_child(ThoughtTree::ROOT, "b".into(), 0.9, true);
        let a1 = tree.add_child(a, "a1".into(), 0.6, false);
        assert_eq!(tree.node(a1).id, "root_1_0_2_0");
        assert_eq!(tree.node(b).id, "root_1_1");
        assert_eq!(tree.path(a1), vec!["a", "a1"]);
        // pruned nodes never win; equal scores prefer depth
        assert_eq!(tree.best(), Some(a1));
    }

    #[tokio::test]
    async fn test_beam_search_follows_best_path() {
        let llm = Scripted::new(distinct_thoughts);
        let agent = ToTAgent::builder()
            .with_llm(llm)
            .with_max_depth(2)
            .with_branching_factor(2)
            .with_beam_width(1)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), TASK.into()).await.unwrap();

        assert_eq!(out.status, AgentStatus::Success);
        assert_eq!(out.metadata["solution_depth"], json!(2));
        assert_eq!(out.metadata["solution_found"], json!(false));
        // root expands to 2, the single beam node expands to 2
        assert_eq!(out.metadata["total_nodes_explored"], json!(5));
        assert_eq!(out.reasoning_steps.len(), 4);
        assert_eq!(out.reasoning_steps[0].action, "Thought (depth=1)");
        let answer = out.result.as_str().unwrap();
        assert!(answer.starts_with("Based on tree-of-thought reasoning:"));
        assert!(answer.contains("Step 2:"));
        assert!(!answer.contains("Final Answer"));
    }

    #[tokio::test]
    async fn test_search_stops_at_solution() {
        let llm = Scripted::new(|prompt, _| {
            if prompt.contains("Has a complete solution") {
                let solved = prompt
                    .lines()
                    .any(|l| l.starts_with("Current thought:") && l.contains("SOLVED"));
                return if solved { "Yes." } else { "no" }.to_string();
            }
            "Step 1: Keep analysing the office building energy costs\nStep 2: SOLVED: reduce energy costs with LED lighting in the office building".to_string()
        });
        let agent = ToTAgent::builder()
            .with_llm(llm)
            .with_branching_factor(2)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), TASK.into()).await.unwrap();

        assert_eq!(out.metadata["solution_found"], json!(true));
        assert_eq!(out.metadata["solution_depth"], json!(1));
        assert!(out.result.as_str().unwrap().contains("Final Answer: SOLVED"));
    }

    #[tokio::test]
    async fn test_depth_first_skips_pruned_branches() {
        let llm = Scripted::new(|prompt, n| {
            if prompt.contains("Has a complete solution") {
                return "no".to_string();
            }
            if prompt.contains("Rate this thought") {
                let bad = prompt
                    .lines()
                    .any(|l| l.starts_with("Current thought:") && l.contains("bad"));
                return if bad { "0.1" } else { "0.9" }.to_string();
            }
            format!("Step 1: a bad idea number {n}\nStep 2: a good idea number {n}")
        });
        let agent = ToTAgent::builder()
            .with_llm(llm)
            .with_strategy(SearchStrategy::DepthFirst)
            .with_evaluation(EvaluationMethod::Llm)
            .with_max_depth(2)
            .with_branching_factor(2)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), TASK.into()).await.unwrap();

        assert_eq!(out.reasoning_steps.len(), 2);
        assert_eq!(out.reasoning_steps[0].action, "Explore (DFS, depth=1)");
        assert_eq!(out.reasoning_steps[1].action, "Explore (DFS, depth=2)");
        assert!(out.reasoning_steps.iter().all(|s| !s.description.contains("bad")));
        assert_eq!(out.metadata["solution_depth"], json!(2));
    }

    #[tokio::test]
    async fn test_breadth_first_explores_level_by_level() {
        let llm = Scripted::new(distinct_thoughts);
        let agent = ToTAgent::builder()
            .with_llm(llm)
            .with_strategy(SearchStrategy::BreadthFirst)
            .with_max_depth(2)
            .with_branching_factor(2)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), TASK.into()).await.unwrap();

        let depths: Vec<&str> = out.reasoning_steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(depths.len(), 6);
        assert!(depths[..2].iter().all(|a| *a == "Explore (BFS, depth=1)"));
        assert!(depths[2..].iter().all(|a| *a == "Explore (BFS, depth=2)"));
    }

    #[tokio::test]
    async fn test_everything_pruned_fails() {
        let llm = Scripted::new(|prompt, _| {
            if prompt.contains("Rate this thought") {
                "0".to_string()
            } else {
                "Step 1: one idea about the building\nStep 2: another idea about the building".to_string()
            }
        });
        let agent = ToTAgent::builder()
            .with_llm(llm)
            .with_evaluation(EvaluationMethod::Llm)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), TASK.into()).await.unwrap();
        assert_eq!(out.status, AgentStatus::Failed);
        assert_eq!(out.error.as_ref().map(|e| e.code), Some(ErrorCode::ExecutionFailed));
    }

    #[test]
    fn test_config_validation() {
        assert!(ToTConfig::default().validate().is_ok());
        let bad = ToTConfig {
            branching_factor: 0,
            ..ToTConfig::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(ToTConfig::default().effective_beam_width(), 3);
        let parsed: ToTConfig = serde_json::from_value(json!({"strategy": "dfs"})).unwrap();
        assert_eq!(parsed.strategy, SearchStrategy::DepthFirst);
    }
}
