//! 结果聚合
//! Result aggregation
//!
//! Aggregation only sees sub-agents that succeeded; failures are reported
//! by the supervisor in metadata.

use super::routing::Assignment;
use crate::agent::base::{ExecutionScope, is_fatal};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentOutput, AgentStatus, value_to_text};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt::Write as _;

/// 聚合策略
/// How sub-agent outputs are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Every output keyed by agent, plus a summary
    #[default]
    Merge,
    /// Sub-agents run in order; the last output is the answer
    Hierarchy,
    /// The LLM picks the single best output
    Best,
    /// The LLM synthesises the points of agreement
    Consensus,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::Merge => "merge",
            AggregationStrategy::Hierarchy => "hierarchy",
            AggregationStrategy::Best => "best",
            AggregationStrategy::Consensus => "consensus",
        }
    }
}

/// 子 Agent 执行结果
/// What one dispatched assignment produced
#[derive(Debug, Clone)]
pub struct SubAgentOutcome {
    pub agent: String,
    pub task: String,
    /// Present whenever the sub-agent returned an output, failed or not
    pub output: Option<AgentOutput>,
    pub error: Option<AgentError>,
    pub duration_ms: u64,
}

impl SubAgentOutcome {
    pub fn new(assignment: &Assignment, result: AgentResult<AgentOutput>, duration_ms: u64) -> Self {
        let (output, error) = match result {
            Ok(output) if output.is_failed() => {
                let error = output
                    .error
                    .clone()
                    .map(AgentError::from)
                    .unwrap_or_else(|| AgentError::ExecutionFailed(output.message.clone()));
                (Some(output), Some(error))
            }
            Ok(output) => (Some(output), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            agent: assignment.agent.clone(),
            task: assignment.task.clone(),
            output,
            error,
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.output.is_some()
    }

    pub fn result(&self) -> Value {
        self.output.as_ref().map(|o| o.result.clone()).unwrap_or(Value::Null)
    }

    pub fn status(&self) -> AgentStatus {
        match (&self.output, &self.error) {
            (Some(output), None) => output.status,
            _ => AgentStatus::Failed,
        }
    }
}

/// 聚合结果
/// Combined result plus metadata entries for the supervisor output
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub result: Value,
    pub metadata: Vec<(&'static str, Value)>,
}

impl Aggregated {
    fn new(result: Value) -> Self {
        Self {
            result,
            metadata: Vec::new(),
        }
    }

    fn with(mut self, key: &'static str, value: Value) -> Self {
        self.metadata.push((key, value));
        self
    }
}

/// Keys that stay unique when one agent receives several sub-tasks.
fn keyed<'a>(outcomes: &[&'a SubAgentOutcome]) -> Vec<(String, &'a SubAgentOutcome)> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    outcomes
        .iter()
        .map(|outcome| {
            let n = seen.entry(outcome.agent.as_str()).or_insert(0);
            *n += 1;
            let key = if *n == 1 {
                outcome.agent.clone()
            } else {
                format!("{}#{n}", outcome.agent)
            };
            (key, *outcome)
        })
        .collect()
}

/// 合并
/// `{agent: {task, result, status, duration_ms}}` plus a line-per-agent summary
pub fn merge(successes: &[&SubAgentOutcome]) -> Aggregated {
    let mut results = Map::new();
    let mut summary = String::new();
    for (key, outcome) in keyed(successes) {
        let _ = writeln!(summary, "[{key}] {}", value_to_text(&outcome.result()));
        results.insert(
            key,
            json!({
                "task": outcome.task,
                "result": outcome.result(),
                "status": outcome.status(),
                "duration_ms": outcome.duration_ms,
            }),
        );
    }
    Aggregated::new(json!({
        "results": results,
        "summary": summary.trim_end(),
    }))
}

/// 层级
/// The last output is primary; earlier ones are kept under `metadata`
pub fn hierarchy(successes: &[&SubAgentOutcome]) -> Aggregated {
    let keyed = keyed(successes);
    let Some(((last_key, last), earlier)) = keyed.split_last() else {
        return Aggregated::new(Value::Null);
    };
    let earlier: Map<String, Value> = earlier
        .iter()
        .map(|(key, outcome)| (key.clone(), outcome.result()))
        .collect();
    Aggregated::new(json!({
        "primary": last.result(),
        "agent": last_key,
        "metadata": earlier.clone(),
    }))
    .with("earlier_outputs", Value::Object(earlier))
}

fn candidates(successes: &[&SubAgentOutcome]) -> String {
    let mut listed = String::new();
    for outcome in successes {
        let _ = writeln!(listed, "[{}]\n{}\n", outcome.agent, value_to_text(&outcome.result()));
    }
    listed
}

/// 择优
/// Ask the LLM for the best output. A reply naming no candidate resolves
/// to the lexicographically smallest one.
pub async fn best(
    ctx: &AgentContext,
    scope: &ExecutionScope,
    llm: &dyn LLMClient,
    task: &str,
    successes: &[&SubAgentOutcome],
) -> AgentResult<Aggregated> {
    let smallest = |pool: &[&SubAgentOutcome]| -> Option<String> {
        pool.iter().map(|o| o.agent.clone()).min()
    };

    let selected = if successes.len() <= 1 {
        smallest(successes)
    } else {
        let prompt = format!(
            "Task: {task}\n\nCandidate answers, each headed by the agent that produced it:\n\n{}Which agent gave the highest-quality answer? Respond with only the agent name.",
            candidates(successes)
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        match scope.llm(ctx, llm, request).await {
            Ok(response) => match named_agent(&response.content, successes) {
                Some(agent) => Some(agent),
                None => {
                    tracing::debug!("best-answer reply named no candidate");
                    smallest(successes)
                }
            },
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "best-answer selection failed");
                smallest(successes)
            }
        }
    };

    let Some(selected) = selected else {
        return Ok(Aggregated::new(Value::Null));
    };
    let result = successes
        .iter()
        .find(|o| o.agent == selected)
        .map(|o| o.result())
        .unwrap_or(Value::Null);
    Ok(Aggregated::new(result).with("selected_agent", json!(selected)))
}

/// The candidate a selection reply names.
///
/// A reply that is exactly one agent name wins outright. Otherwise names
/// must appear as whole words, so `writer` does not match inside
/// `writer_v2`; the longest such name wins and equal lengths go to the
/// lexicographically smallest.
fn named_agent(reply: &str, pool: &[&SubAgentOutcome]) -> Option<String> {
    let bare = reply
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '[' | ']' | '.'))
        .trim();
    if let Some(exact) = pool.iter().find(|o| o.agent == bare) {
        return Some(exact.agent.clone());
    }
    pool.iter()
        .map(|o| o.agent.as_str())
        .filter(|agent| mentions(reply, agent))
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
        .map(str::to_string)
}

fn mentions(text: &str, name: &str) -> bool {
    let is_name_char = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    if name.is_empty() {
        return false;
    }
    text.match_indices(name).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char)
    })
}

/// 共识
/// LLM synthesis of the agreeing points. Falls back to the most common
/// output when the call fails.
pub async fn consensus(
    ctx: &AgentContext,
    scope: &ExecutionScope,
    llm: &dyn LLMClient,
    task: &str,
    successes: &[&SubAgentOutcome],
) -> AgentResult<Aggregated> {
    if successes.len() <= 1 {
        let result = successes.first().map(|o| o.result()).unwrap_or(Value::Null);
        return Ok(Aggregated::new(result).with("consensus_method", json!("single")));
    }
    let prompt = format!(
        "Task: {task}\n\nSeveral agents answered independently:\n\n{}Synthesize a single answer from the points the agents agree on. Note any significant disagreement briefly.",
        candidates(successes)
    );
    let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
    match scope.llm(ctx, llm, request).await {
        Ok(response) => Ok(Aggregated::new(json!(response.content.trim()))
            .with("consensus_method", json!("llm"))),
        Err(e) if is_fatal(&e) => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "consensus synthesis failed, using majority vote");
            Ok(Aggregated::new(majority(successes)).with("consensus_method", json!("vote")))
        }
    }
}

/// Most common output text; ties go to the lexicographically smallest agent.
fn majority(successes: &[&SubAgentOutcome]) -> Value {
    let mut counts: HashMap<String, (usize, &str, Value)> = HashMap::new();
    for outcome in successes {
        let result = outcome.result();
        let entry = counts
            .entry(value_to_text(&result))
            .or_insert((0, outcome.agent.as_str(), result));
        entry.0 += 1;
        if outcome.agent.as_str() < entry.1 {
            entry.1 = outcome.agent.as_str();
        }
    }
    counts
        .into_values()
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, _, value)| value)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(agent: &str, result: &str) -> SubAgentOutcome {
        SubAgentOutcome::new(
            &Assignment::new(agent, "t"),
            Ok(AgentOutput::success(result)),
            5,
        )
    }

    #[test]
    fn test_failed_output_is_not_success() {
        let failed = SubAgentOutcome::new(
            &Assignment::new("a", "t"),
            Ok(AgentOutput::failed(&AgentError::ExecutionFailed("boom".into()))),
            1,
        );
        assert!(!failed.succeeded());
        assert!(failed.output.is_some());
        assert_eq!(failed.status(), AgentStatus::Failed);

        let errored = SubAgentOutcome::new(&Assignment::new("a", "t"), Err(AgentError::timeout(10)), 10);
        assert!(!errored.succeeded());
        assert!(errored.output.is_none());
    }

    #[test]
    fn test_merge_keys_and_summary() {
        let a = outcome("search", "Paris");
        let b = outcome("search", "France");
        let c = outcome("weather", "Sunny");
        let merged = merge(&[&a, &b, &c]);
        assert_eq!(merged.result["results"]["search"]["result"], json!("Paris"));
        assert_eq!(merged.result["results"]["search#2"]["result"], json!("France"));
        assert_eq!(merged.result["results"]["weather"]["status"], json!("success"));
        assert_eq!(
            merged.result["summary"],
            json!("[search] Paris\n[search#2] France\n[weather] Sunny")
        );
    }

    #[test]
    fn test_hierarchy_primary_is_last() {
        let a = outcome("search", "Paris");
        let b = outcome("weather", "Sunny 25°C");
        let c = outcome("summary", "Paris, sunny 25°C.");
        let agg = hierarchy(&[&a, &b, &c]);
        assert_eq!(agg.result["primary"], json!("Paris, sunny 25°C."));
        assert_eq!(agg.result["agent"], json!("summary"));
        assert_eq!(agg.result["metadata"], json!({"search": "Paris", "weather": "Sunny 25°C"}));
        assert_eq!(agg.metadata[0].0, "earlier_outputs");
    }

    #[test]
    fn test_named_agent_is_whole_word() {
        let writer = outcome("writer", "bad");
        let v2 = outcome("writer_v2", "good");
        let pool = [&writer, &v2];
        assert_eq!(named_agent("writer_v2", &pool).as_deref(), Some("writer_v2"));
        assert_eq!(named_agent("**writer_v2**.", &pool).as_deref(), Some("writer_v2"));
        assert_eq!(named_agent("The best is writer_v2.", &pool).as_deref(), Some("writer_v2"));
        assert_eq!(named_agent("Clearly `writer`", &pool).as_deref(), Some("writer"));
        assert_eq!(named_agent("none of them", &pool), None);
    }

    #[test]
    fn test_named_agent_prefers_longest_then_smallest() {
        let a = outcome("alpha", "1");
        let b = outcome("beta", "2");
        let c = outcome("alphabet", "3");
        assert_eq!(named_agent("alpha or alphabet", &[&a, &b, &c]).as_deref(), Some("alphabet"));
        let d = outcome("gamma", "4");
        assert_eq!(named_agent("gamma and alpha", &[&a, &d]).as_deref(), Some("alpha"));
    }

    #[test]
    fn test_majority_tie_breaks_by_name() {
        let a = outcome("zeta", "yes");
        let b = outcome("alpha", "no");
        let c = outcome("beta", "yes");
        assert_eq!(majority(&[&a, &b, &c]), json!("yes"));
        let d = outcome("zeta", "x");
        let e = outcome("alpha", "y");
        assert_eq!(majority(&[&d, &e]), json!("y"));
    }
}
