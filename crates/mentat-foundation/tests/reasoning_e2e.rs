//! End-to-end tests for the chain-of-thought, skeleton-of-thought and
//! graph-of-thought engines driven by [`MockLLMClient`].

mod common;

use std::time::Duration;

use common::mock_client::{MOCK_USAGE, MockLLMClient};

use mentat_foundation::cot::{StepParser, render_chain};
use mentat_foundation::prelude::*;
use mentat_foundation::reasoning::ThoughtGraph;
use serde_json::{Value, json};

const COT_RESPONSE: &str = "**Step 1:** subtract 5 from 15.\n\\[15-5=10\\]\n**Step 2:** add 8.\n\\[10+8=18\\]\n**Step 3:** divide.\n\\[18/2=9\\]\nTherefore, the final answer is: 9";

const OUTLINE: &str = "1. Intro: set the scene\n2. Body: main argument\n3. Data: numbers\n4. Summary: wrap up (Depends on: 1, 2, 3)";

// ─────────────────────────────────────────────────────────────────────────────
// § 1  Chain of thought
// ─────────────────────────────────────────────────────────────────────────────

/// Formula lines belong to their step: three steps, not nine.
#[tokio::test]
async fn cot_parses_three_steps_and_final_answer() {
    let llm = MockLLMClient::replying(COT_RESPONSE);
    let agent = CoTAgent::builder()
        .with_llm(llm.clone())
        .build()
        .expect("agent should build");

    let out = agent
        .invoke(&AgentContext::new(), AgentInput::new("Calculate (15-5+8)/2"))
        .await
        .expect("invoke should succeed");

    assert!(out.is_success());
    assert_eq!(out.result, json!("9"));
    assert_eq!(out.reasoning_steps.len(), 3);
    let indices: Vec<usize> = out.reasoning_steps.iter().map(|s| s.step_index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(out.token_usage, MOCK_USAGE);
    assert_eq!(llm.call_count(), 1);
}

/// Rendering a parsed chain and parsing it again changes nothing.
#[test]
fn cot_parser_is_idempotent_over_render() {
    let parser = StepParser::default();
    let parsed = parser.parse(COT_RESPONSE);
    assert_eq!(parsed.steps.len(), 3);
    assert_eq!(parsed.final_answer, "9");

    let rendered = render_chain(&parsed.steps, &parsed.final_answer, parser.final_answer_format());
    let reparsed = parser.parse(&rendered);
    assert_eq!(reparsed.steps, parsed.steps);
    assert_eq!(reparsed.final_answer, parsed.final_answer);
}

/// Providers that omit usage still produce a non-zero estimate.
#[tokio::test]
async fn cot_estimates_missing_usage() {
    let llm = MockLLMClient::builder()
        .with_default_reply(COT_RESPONSE)
        .without_usage()
        .build();
    let agent = CoTAgent::builder().with_llm(llm).build().expect("agent should build");

    let out = agent
        .invoke(&AgentContext::new(), AgentInput::new("Calculate (15-5+8)/2"))
        .await
        .expect("invoke should succeed");

    let usage = out.token_usage;
    assert!(usage.completion_tokens > 0);
    assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
}

// ─────────────────────────────────────────────────────────────────────────────
// § 2  Skeleton of thought
// ─────────────────────────────────────────────────────────────────────────────

/// Independent points elaborate in one wave: phase two costs two call
/// latencies, not four.
#[tokio::test(start_paused = true)]
async fn sot_elaborates_independent_points_concurrently() {
    let llm = MockLLMClient::builder()
        .when_prompt_contains("skeleton outline", OUTLINE)
        .with_default_reply("elaborated")
        .with_latency(Duration::from_millis(100))
        .build();
    let agent = SoTAgent::builder()
        .with_llm(llm.clone())
        .with_max_concurrency(4)
        .build()
        .expect("agent should build");

    let started = tokio::time::Instant::now();
    let out = agent
        .invoke(&AgentContext::new(), AgentInput::new("Write a report"))
        .await
        .expect("invoke should succeed");
    let elapsed = started.elapsed();

    assert!(out.is_success());
    assert_eq!(llm.call_count(), 5);
    // skeleton + wave {1,2,3} + point 4
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    assert_eq!(out.token_usage.total_tokens, 5 * MOCK_USAGE.total_tokens);
}

/// With a concurrency limit of one the wave is serialised.
#[tokio::test(start_paused = true)]
async fn sot_concurrency_limit_serialises_wave() {
    let llm = MockLLMClient::builder()
        .when_prompt_contains("skeleton outline", OUTLINE)
        .with_default_reply("elaborated")
        .with_latency(Duration::from_millis(100))
        .build();
    let agent = SoTAgent::builder()
        .with_llm(llm)
        .with_max_concurrency(1)
        .build()
        .expect("agent should build");

    let started = tokio::time::Instant::now();
    agent
        .invoke(&AgentContext::new(), AgentInput::new("Write a report"))
        .await
        .expect("invoke should succeed");
    assert!(started.elapsed() >= Duration::from_millis(500));
}

// ─────────────────────────────────────────────────────────────────────────────
// § 3  Graph of thought
// ─────────────────────────────────────────────────────────────────────────────

/// A → B then B → A is refused before any model call.
#[tokio::test]
async fn got_rejects_cyclic_graph() {
    let llm = MockLLMClient::replying("unused");
    let agent = GoTAgent::builder().with_llm(llm.clone()).build().expect("agent should build");

    let mut graph = ThoughtGraph::new("plan a trip");
    graph.add_node("a", "pick a city", 0.9).expect("node a");
    graph.add_node("b", "pick dates", 0.8).expect("node b");
    graph.add_dependency("a", "b").expect("b depends on a");
    graph.add_dependency("b", "a").expect("a depends on b");
    assert!(graph.topological_order().is_err());

    let out = agent
        .invoke_graph(&AgentContext::new(), AgentInput::new("plan a trip"), graph)
        .await
        .expect("cycles are reported through the output");

    assert_eq!(out.status, AgentStatus::Failed);
    assert_eq!(out.error.map(|e| e.code), Some(ErrorCode::CycleDetected));
    assert_eq!(out.result, Value::Null);
    assert_eq!(llm.call_count(), 0);
}

/// Dependencies always come before their dependents.
#[test]
fn got_topological_order_respects_dependencies() {
    let mut graph = ThoughtGraph::new("task");
    for (id, score) in [("a", 0.9), ("b", 0.8), ("c", 0.7)] {
        graph.add_node(id, format!("thought {id}"), score).expect("node");
    }
    graph.add_dependency("a", "c").expect("edge");
    graph.add_dependency("b", "c").expect("edge");

    let order = graph.topological_order().expect("acyclic");
    let position = |id: &str| order.iter().position(|n| n == id).expect("present");
    assert!(position("a") < position("c"));
    assert!(position("b") < position("c"));
    assert_eq!(graph.wave_ids().expect("acyclic").last(), Some(&vec!["c".to_string()]));
}
