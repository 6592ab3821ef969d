//! 思维骨架 (Skeleton-of-Thought)
//! Skeleton-of-thought engine
//!
//! Three phases: one call drafts an outline, the outline points are
//! elaborated in parallel waves ordered by their dependencies, and the
//! elaborations are aggregated into the answer.

use super::heuristics::strip_numbering;
use crate::agent::base::{AgentBase, ExecutionScope, is_fatal};
use crate::agent::prompt::{render_task, truncate_chars};
use async_trait::async_trait;
use futures::future::join_all;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ReasoningStep};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::Instrument;

const DEPENDS_ON: &str = "depends on:";

/// 聚合策略
/// How elaborated points are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkeletonAggregation {
    #[default]
    Sequential,
    /// Points nested under the point they depend on
    Hierarchical,
    /// Synthesis call; falls back to sequential when it fails
    Llm,
}

impl SkeletonAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkeletonAggregation::Sequential => "sequential",
            SkeletonAggregation::Hierarchical => "hierarchical",
            SkeletonAggregation::Llm => "llm",
        }
    }
}

/// SoT 配置
/// SoT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoTConfig {
    pub name: String,
    pub description: String,
    pub min_points: usize,
    pub max_points: usize,
    pub max_concurrency: usize,
    pub elaboration_timeout_ms: u64,
    pub aggregation: SkeletonAggregation,
    /// Pass completed dependency elaborations into each prompt
    pub dependency_aware: bool,
}

impl Default for SoTConfig {
    fn default() -> Self {
        Self {
            name: "sot".to_string(),
            description: "Skeleton-of-thought reasoning agent".to_string(),
            min_points: 3,
            max_points: 10,
            max_concurrency: 5,
            elaboration_timeout_ms: 30_000,
            aggregation: SkeletonAggregation::Sequential,
            dependency_aware: true,
        }
    }
}

impl SoTConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.min_points == 0 || self.min_points > self.max_points {
            return Err(AgentError::ConfigInvalid(format!(
                "sot: need 1 <= min_points <= max_points, got {}..{}",
                self.min_points, self.max_points
            )));
        }
        if self.max_concurrency == 0 {
            return Err(AgentError::ConfigInvalid(
                "sot: max_concurrency must be at least 1".into(),
            ));
        }
        if self.elaboration_timeout_ms == 0 {
            return Err(AgentError::ConfigInvalid(
                "sot: elaboration_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// 骨架要点状态
/// Point status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug)]
struct PointState {
    status: PointStatus,
    elaboration: Option<String>,
}

/// 骨架要点
/// One outline point
#[derive(Debug)]
pub struct SkeletonPoint {
    pub id: String,
    pub title: String,
    pub description: String,
    pub dependencies: Vec<String>,
    /// 执行顺序，解析时取列表位置
    pub priority: usize,
    /// Ids of the points nested under this one
    pub sub_points: Vec<String>,
    state: RwLock<PointState>,
}

impl SkeletonPoint {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            dependencies: Vec::new(),
            priority: 0,
            sub_points: Vec::new(),
            state: RwLock::new(PointState {
                status: PointStatus::Pending,
                elaboration: None,
            }),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sub_points(mut self, sub_points: Vec<String>) -> Self {
        self.sub_points = sub_points;
        self
    }

    pub fn status(&self) -> PointStatus {
        self.state.read().status
    }

    pub fn elaboration(&self) -> Option<String> {
        self.state.read().elaboration.clone()
    }

    fn set_status(&self, status: PointStatus) {
        self.state.write().status = status;
    }

    fn complete(&self, elaboration: String) {
        let mut state = self.state.write();
        state.elaboration = Some(elaboration);
        state.status = PointStatus::Completed;
    }
}

/// 解析骨架
/// Parse an outline response into at most `max_points` points
///
/// Lines look like `N. Title: description (Depends on: a, b)`. With fewer
/// than `min_points` items, paragraphs of the raw response pad the list;
/// an empty result falls back to an analysis / solution / conclusion
/// outline. Dependencies on unknown points are dropped.
pub fn parse_skeleton(response: &str, min_points: usize, max_points: usize) -> Vec<SkeletonPoint> {
    let mut parsed: Vec<(String, String, String)> = Vec::new();
    for line in response.lines().map(str::trim) {
        if parsed.len() >= max_points {
            break;
        }
        let line = line.trim_start_matches(['*', '#', '-', ' ']);
        let Some(content) = strip_numbering(line) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        let (body, deps) = split_dependencies(content);
        let (title, description) = match body.split_once([':', '：']) {
            Some((t, d)) => (clean_title(t), d.trim().to_string()),
            None => (clean_title(body), body.trim().to_string()),
        };
        if !title.is_empty() {
            parsed.push((title, description, deps));
        }
    }

    if parsed.len() < min_points {
        for paragraph in response.split("\n\n").map(str::trim) {
            if parsed.len() >= min_points {
                break;
            }
            let has_item = paragraph
                .lines()
                .any(|l| strip_numbering(l.trim_start_matches(['*', '#', '-', ' '])).is_some());
            if paragraph.is_empty() || has_item {
                continue;
            }
            let first = paragraph.lines().next().unwrap_or(paragraph);
            let title = truncate_chars(first.trim(), 60);
            parsed.push((title, paragraph.to_string(), String::new()));
        }
    }

    if parsed.is_empty() {
        return default_skeleton();
    }

    let ids: Vec<String> = (1..=parsed.len()).map(|i| format!("point_{i}")).collect();
    let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let points = parsed
        .into_iter()
        .zip(ids.iter())
        .enumerate()
        .map(|(i, ((title, description, deps), id))| {
            let dependencies = parse_dependencies(&deps)
                .into_iter()
                .filter(|d| d != id && known.contains(d.as_str()))
                .collect();
            SkeletonPoint::new(id.clone(), title, description)
                .with_dependencies(dependencies)
                .with_priority(i)
        })
        .collect();
    link_sub_points(points)
}

fn default_skeleton() -> Vec<SkeletonPoint> {
    link_sub_points(vec![
        SkeletonPoint::new("point_1", "Analysis", "Analyze the problem"),
        SkeletonPoint::new("point_2", "Solution", "Develop the solution")
            .with_dependencies(vec!["point_1".into()])
            .with_priority(1),
        SkeletonPoint::new("point_3", "Conclusion", "Summarize the findings")
            .with_dependencies(vec!["point_2".into()])
            .with_priority(2),
    ])
}

/// Nest every point under its first dependency.
fn link_sub_points(mut points: Vec<SkeletonPoint>) -> Vec<SkeletonPoint> {
    let children: Vec<(usize, String)> = points
        .iter()
        .filter_map(|child| {
            let parent = child.dependencies.first()?;
            let index = points.iter().position(|p| &p.id == parent)?;
            Some((index, child.id.clone()))
        })
        .collect();
    for (index, child) in children {
        points[index].sub_points.push(child);
    }
    points
}

fn clean_title(title: &str) -> String {
    title
        .trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '*'))
        .trim()
        .to_string()
}

/// Split off a `Depends on:` clause, with or without parentheses.
fn split_dependencies(content: &str) -> (&str, String) {
    let lower = content.to_ascii_lowercase();
    let Some(idx) = lower.find(DEPENDS_ON) else {
        return (content, String::new());
    };
    let body = content[..idx].trim_end().trim_end_matches(['(', '[']).trim_end();
    let deps = content[idx + DEPENDS_ON.len()..]
        .trim()
        .trim_end_matches([')', ']', '.'])
        .to_string();
    (body, deps)
}

fn parse_dependencies(deps: &str) -> Vec<String> {
    deps.split([',', '，'])
        .map(|p| p.trim().trim_start_matches(['#']).trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            let bare = p
                .strip_prefix("point ")
                .or_else(|| p.strip_prefix("Point "))
                .unwrap_or(p)
                .trim();
            if bare.chars().all(|c| c.is_ascii_digit()) {
                format!("point_{bare}")
            } else {
                p.to_string()
            }
        })
        .collect()
}

/// 按依赖深度分组
/// Group points into waves by dependency depth
///
/// Points whose dependencies can never be satisfied (a cycle) form a
/// final wave of their own.
fn group_waves(points: &[SkeletonPoint]) -> Vec<Vec<usize>> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..points.len()).collect();
    let mut waves = Vec::new();
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining
            .iter()
            .partition(|&&i| points[i].dependencies.iter().all(|d| done.contains(d.as_str())));
        if ready.is_empty() {
            tracing::warn!(points = blocked.len(), "circular skeleton dependencies ignored");
            waves.push(blocked);
            break;
        }
        done.extend(ready.iter().map(|&i| points[i].id.as_str()));
        waves.push(ready);
        remaining = blocked;
    }
    waves
}

/// 思维骨架 Agent
/// Skeleton-of-thought agent
pub struct SoTAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    config: SoTConfig,
}

impl SoTAgent {
    pub fn builder() -> SoTAgentBuilder {
        SoTAgentBuilder::default()
    }

    pub fn config(&self) -> &SoTConfig {
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

        let started = Instant::now();
        let skeleton = match self.generate_skeleton(ctx, scope, &task).await {
            Ok(points) => points,
            Err(e) => return scope.fail(e, None),
        };
        scope.push_step(
            ReasoningStep::new(
                "Generate Skeleton",
                format!("Created {} skeleton points", skeleton.len()),
                json!(format_skeleton(&skeleton)),
            )
            .with_duration(started.elapsed().as_millis() as u64),
        );

        if let Err(e) = self.elaborate(ctx, scope, &task, &skeleton).await {
            let done: Vec<&SkeletonPoint> = skeleton
                .iter()
                .filter(|p| p.status() == PointStatus::Completed)
                .collect();
            let partial = (!done.is_empty()).then(|| json!(aggregate_sequential(&done)));
            return scope.fail(e, partial);
        }

        let started = Instant::now();
        let answer = match self.aggregate(ctx, scope, &task, &skeleton).await {
            Ok(answer) => answer,
            Err(e) => return scope.fail(e, None),
        };
        scope.push_step(
            ReasoningStep::new(
                "Aggregate Results",
                format!("Combined points with {} aggregation", self.config.aggregation.as_str()),
                json!(truncate_chars(&answer, 100)),
            )
            .with_duration(started.elapsed().as_millis() as u64),
        );

        scope.set_metadata("skeleton_points", json!(skeleton.len()));
        scope.set_metadata("parallel_concurrency", json!(self.config.max_concurrency));
        scope.set_metadata("aggregation_strategy", json!(self.config.aggregation.as_str()));
        Ok(scope.succeed(answer, "skeleton of thought complete"))
    }

    async fn generate_skeleton(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
    ) -> AgentResult<Vec<SkeletonPoint>> {
        let (min, max) = (self.config.min_points, self.config.max_points);
        let prompt = format!(
            "Break down the following task into a skeleton outline with {min}-{max} key points:\n\n\
             Task: {task}\n\n\
             Each point should have a clear title, be elaborated independently where possible, and contribute to the overall task.\n\n\
             Format each point as:\n\
             1. Title: brief description\n\
             If a point depends on others, end it with (Depends on: 1, 2)."
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are an expert at decomposing complex problems into structured outlines."),
            ChatMessage::user(prompt),
        ]);
        let response = scope.llm(ctx, self.llm.as_ref(), request).await?;
        let points = parse_skeleton(&response.content, min, max);
        tracing::debug!(points = points.len(), "skeleton parsed");
        Ok(points)
    }

    /// 分波并行展开
    /// Elaborate every point, one dependency wave at a time
    ///
    /// Points of a wave run concurrently, bounded by `max_concurrency`.
    /// A failed point does not stop its siblings, but no later wave starts.
    async fn elaborate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        skeleton: &[SkeletonPoint],
    ) -> AgentResult<()> {
        let semaphore = Semaphore::new(self.config.max_concurrency);
        for (level, wave) in group_waves(skeleton).into_iter().enumerate() {
            tracing::debug!(level = level + 1, width = wave.len(), "elaborating skeleton wave");
            let results = join_all(wave.iter().map(|&i| {
                self.elaborate_point(ctx, scope, task, skeleton, &skeleton[i], level + 1, &semaphore)
            }))
            .await;

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

    #[allow(clippy::too_many_arguments)]
    async fn elaborate_point(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        skeleton: &[SkeletonPoint],
        point: &SkeletonPoint,
        level: usize,
        semaphore: &Semaphore,
    ) -> AgentResult<()> {
        let span = tracing::info_span!("sot.elaborate", point = %point.id, level);
        async {
            let _permit = ctx
                .guard(async {
                    semaphore
                        .acquire()
                        .await
                        .map_err(|_| AgentError::Internal("skeleton semaphore closed".into()))
                })
                .await?;
            point.set_status(PointStatus::Processing);
            let started = Instant::now();

            let mut prompt = format!(
                "Elaborate on the following point for the task:\n\nTask: {task}\n\nPoint: {}\nDescription: {}\n\n",
                point.title, point.description
            );
            if self.config.dependency_aware && !point.dependencies.is_empty() {
                prompt.push_str("Context from dependencies:\n");
                for dep in skeleton.iter().filter(|p| point.dependencies.contains(&p.id)) {
                    if let Some(text) = dep.elaboration() {
                        let _ = writeln!(prompt, "- {}: {text}", dep.title);
                    }
                }
                prompt.push('\n');
            }
            prompt.push_str("Provide a detailed elaboration that fully addresses this point.");

            let point_ctx = ctx
                .child()
                .with_timeout(Duration::from_millis(self.config.elaboration_timeout_ms));
            let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
            let result = scope.llm(&point_ctx, self.llm.as_ref(), request).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let action = format!("Elaborate (Level {level})");

            match result {
                Ok(response) => {
                    let text = response.content.trim().to_string();
                    scope.push_step(
                        ReasoningStep::new(action, point.title.clone(), json!(truncate_chars(&text, 100)))
                            .with_duration(duration_ms),
                    );
                    point.complete(text);
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(point = %point.id, error = %e, "elaboration failed");
                    point.set_status(PointStatus::Failed);
                    scope.push_step(
                        ReasoningStep::new(action, point.title.clone(), json!(null))
                            .with_duration(duration_ms)
                            .failed(e.to_string()),
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn aggregate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        skeleton: &[SkeletonPoint],
    ) -> AgentResult<String> {
        let points: Vec<&SkeletonPoint> = skeleton.iter().collect();
        match self.config.aggregation {
            SkeletonAggregation::Sequential => Ok(aggregate_sequential(&points)),
            SkeletonAggregation::Hierarchical => Ok(aggregate_hierarchical(skeleton)),
            SkeletonAggregation::Llm => {
                let mut prompt = format!("Given these elaborated points for the task \"{task}\":\n\n");
                for point in skeleton {
                    let _ = writeln!(prompt, "- {}: {}", point.title, point.elaboration().unwrap_or_default());
                }
                prompt.push_str("\nSynthesize them into a coherent answer, giving appropriate weight to each point.");
                let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
                match scope.llm(ctx, self.llm.as_ref(), request).await {
                    Ok(response) => Ok(response.content.trim().to_string()),
                    Err(e) if is_fatal(&e) => Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "synthesis failed, aggregating sequentially");
                        Ok(aggregate_sequential(&points))
                    }
                }
            }
        }
    }
}

fn format_skeleton(skeleton: &[SkeletonPoint]) -> String {
    let mut out = String::new();
    for (i, point) in skeleton.iter().enumerate() {
        let _ = write!(out, "{}. {}", i + 1, point.title);
        if !point.dependencies.is_empty() {
            let _ = write!(out, " (depends on: {})", point.dependencies.join(", "));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn aggregate_sequential(points: &[&SkeletonPoint]) -> String {
    let mut out = String::new();
    for (i, point) in points.iter().enumerate() {
        let _ = write!(
            out,
            "{}. **{}**\n   {}\n\n",
            i + 1,
            point.title,
            point.elaboration().unwrap_or_default()
        );
    }
    out.trim_end().to_string()
}

/// 层级汇总
/// Write each point followed by its sub-points, indented one level deeper
///
/// Roots are points nobody lists as a sub-point, in priority order. Points
/// only reachable through a cycle are appended at the top level afterwards,
/// so every point appears exactly once.
fn aggregate_hierarchical(skeleton: &[SkeletonPoint]) -> String {
    fn write_point<'a>(
        out: &mut String,
        by_id: &HashMap<&str, &'a SkeletonPoint>,
        visited: &mut HashSet<&'a str>,
        point: &'a SkeletonPoint,
        level: usize,
    ) {
        if !visited.insert(point.id.as_str()) {
            return;
        }
        let indent = "  ".repeat(level);
        let _ = writeln!(out, "{indent}• {}", point.title);
        let _ = writeln!(out, "{indent}  {}", point.elaboration().unwrap_or_default());
        for child in point.sub_points.iter().filter_map(|id| by_id.get(id.as_str()).copied()) {
            write_point(out, by_id, visited, child, level + 1);
        }
    }

    let mut ordered: Vec<&SkeletonPoint> = skeleton.iter().collect();
    ordered.sort_by_key(|p| p.priority);
    let by_id: HashMap<&str, &SkeletonPoint> = skeleton.iter().map(|p| (p.id.as_str(), p)).collect();
    let nested: HashSet<&str> = skeleton
        .iter()
        .flat_map(|p| p.sub_points.iter().map(String::as_str))
        .collect();

    let mut visited = HashSet::new();
    let mut out = String::from("Hierarchical analysis:\n\n");
    let roots = ordered.iter().filter(|p| !nested.contains(p.id.as_str()));
    let unreached = ordered.iter().filter(|p| nested.contains(p.id.as_str()));
    for &point in roots.chain(unreached) {
        if visited.contains(point.id.as_str()) {
            continue;
        }
        write_point(&mut out, &by_id, &mut visited, point, 0);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[async_trait]
impl Agent for SoTAgent {
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

/// SoT Agent 构建器
/// SoT agent builder
#[derive(Default)]
pub struct SoTAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    callbacks: Vec<Arc<dyn Callback>>,
    config: SoTConfig,
}

impl SoTAgentBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_config(mut self, config: SoTConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_points(mut self, min: usize, max: usize) -> Self {
        self.config.min_points = min;
        self.config.max_points = max;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn with_elaboration_timeout(mut self, timeout: Duration) -> Self {
        self.config.elaboration_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_aggregation(mut self, aggregation: SkeletonAggregation) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    pub fn build(self) -> AgentResult<SoTAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("sot: LLM client not set".to_string()))?;
        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["skeleton_of_thought", "parallel", "reasoning"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(SoTAgent {
            base,
            llm,
            config: self.config,
        })
    }
}
