//! End-to-end tests for supervision, sequential chains and the middleware
//! chain, with real engines as sub-agents and [`MockLLMClient`] underneath.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::mock_client::{MOCK_USAGE, MockLLMClient};
use common::RecordingCallback;
use parking_lot::Mutex;

use mentat_foundation::middleware::{
    AgentHandler, CacheMiddleware, FnMiddleware, MiddlewareRequest, handler_fn,
};
use mentat_foundation::prelude::*;
use serde_json::json;

/// ReAct agent that answers immediately with `answer`.
fn answering(name: &str, answer: &str) -> (Arc<ReActAgent>, Arc<MockLLMClient>) {
    let llm = MockLLMClient::replying(format!("Final Answer: {answer}"));
    let agent = ReActAgent::builder()
        .with_name(name)
        .with_llm(llm.clone())
        .build()
        .expect("agent should build");
    (Arc::new(agent), llm)
}

// ─────────────────────────────────────────────────────────────────────────────
// § 1  Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// search → weather → summary in hierarchy mode: the last answer is primary,
/// earlier ones are kept, usage is the sum of every call.
#[tokio::test]
async fn supervisor_hierarchy_merges_outputs() {
    let (search, _) = answering("search", "Paris");
    let (weather, _) = answering("weather", "Sunny 25°C");
    let (summary, summary_llm) = answering("summary", "Paris, sunny 25°C.");
    let plan = r#"[
        {"agent": "search", "task": "find the destination city"},
        {"agent": "weather", "task": "get the forecast"},
        {"agent": "summary", "task": "summarise the trip"}
    ]"#;
    let supervisor = SupervisorAgent::builder()
        .with_llm(MockLLMClient::replying(plan))
        .with_routing(RoutingStrategy::Llm)
        .with_aggregation(AggregationStrategy::Hierarchy)
        .with_sub_agent(search)
        .with_sub_agent(weather)
        .with_sub_agent(summary)
        .build()
        .expect("supervisor should build");

    let out = supervisor
        .invoke(&AgentContext::new(), AgentInput::new("Where am I going and what is the weather?"))
        .await
        .expect("invoke should succeed");

    assert_eq!(out.status, AgentStatus::Success);
    assert_eq!(out.result["primary"], json!("Paris, sunny 25°C."));
    assert_eq!(out.result["agent"], json!("summary"));
    assert_eq!(
        out.result["metadata"],
        json!({"search": "Paris", "weather": "Sunny 25°C"})
    );
    // three sub-agents plus the routing call
    assert_eq!(out.token_usage.total_tokens, 4 * MOCK_USAGE.total_tokens);
    assert_eq!(out.metadata["agents_used"], json!(["search", "weather", "summary"]));

    let seen = summary_llm.last_prompt().expect("summary was called");
    assert!(seen.contains("previous_outputs"));
    assert!(seen.contains("Sunny 25°C"));
}

/// Parallel dispatch never exceeds `max_parallel` in-flight sub-agents.
#[tokio::test(start_paused = true)]
async fn supervisor_parallel_dispatch_is_bounded() {
    let names = ["a", "b", "c", "d"];
    let mut builder = SupervisorAgent::builder()
        .with_llm(MockLLMClient::replying(
            r#"[{"agent":"a"},{"agent":"b"},{"agent":"c"},{"agent":"d"}]"#,
        ))
        .with_max_parallel(2);
    for name in names {
        let llm = MockLLMClient::builder()
            .with_default_reply(format!("Final Answer: {name}"))
            .with_latency(Duration::from_millis(100))
            .build();
        let agent = ReActAgent::builder()
            .with_name(name)
            .with_llm(llm)
            .build()
            .expect("agent should build");
        builder = builder.with_sub_agent(Arc::new(agent));
    }
    let supervisor = builder.build().expect("supervisor should build");

    let started = tokio::time::Instant::now();
    let out = supervisor
        .invoke(&AgentContext::new(), AgentInput::new("do everything"))
        .await
        .expect("invoke should succeed");
    let elapsed = started.elapsed();

    assert_eq!(out.status, AgentStatus::Success);
    // four 100ms sub-agents, two at a time
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "elapsed {elapsed:?}");
    let results = out.result["results"].as_object().expect("merged results");
    assert_eq!(results.len(), 4);
}

/// A failing sub-agent degrades the run to partial and is named in metadata.
#[tokio::test]
async fn supervisor_partial_on_sub_agent_failure() {
    let (good, _) = answering("good", "fine");
    let broken_llm = MockLLMClient::builder()
        .respond_with_error(AgentError::llm("model offline"))
        .build();
    let broken = ReActAgent::builder()
        .with_name("broken")
        .with_llm(broken_llm)
        .build()
        .expect("agent should build");
    let supervisor = SupervisorAgent::builder()
        .with_llm(MockLLMClient::replying(r#"[{"agent":"good"},{"agent":"broken"}]"#))
        .with_sub_agent(good)
        .with_sub_agent(Arc::new(broken))
        .build()
        .expect("supervisor should build");

    let out = supervisor
        .invoke(&AgentContext::new(), AgentInput::new("try both"))
        .await
        .expect("invoke should succeed");

    assert_eq!(out.status, AgentStatus::Partial);
    assert!(out.metadata["failed_agents"].get("broken").is_some());
    assert!(out.result["results"].get("good").is_some());
}

/// Best-answer selection matches whole agent names, so `writer` never
/// shadows `writer_v2`.
#[tokio::test]
async fn supervisor_best_matches_whole_agent_name() {
    let (writer, _) = answering("writer", "bad");
    let (writer_v2, _) = answering("writer_v2", "good");
    let llm = MockLLMClient::builder()
        .respond_with(r#"[{"agent": "writer"}, {"agent": "writer_v2"}]"#)
        .respond_with("writer_v2")
        .build();
    let supervisor = SupervisorAgent::builder()
        .with_llm(llm.clone())
        .with_aggregation(AggregationStrategy::Best)
        .with_sub_agent(writer)
        .with_sub_agent(writer_v2)
        .build()
        .expect("supervisor should build");

    let out = supervisor
        .invoke(&AgentContext::new(), AgentInput::new("write a tagline"))
        .await
        .expect("invoke should succeed");

    assert_eq!(out.status, AgentStatus::Success);
    assert_eq!(out.result, json!("good"));
    assert_eq!(out.metadata["selected_agent"], json!("writer_v2"));
    assert_eq!(llm.call_count(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// § 2  Sequential chain
// ─────────────────────────────────────────────────────────────────────────────

/// Each stage sees the previous answer as its task.
#[tokio::test]
async fn chain_pipes_answers_between_engines() {
    let (draft, _) = answering("draft", "a rough draft");
    let (polish, polish_llm) = answering("polish", "a polished draft");
    let recorder = RecordingCallback::new();
    let pipeline = AgentChain::builder()
        .then(draft)
        .then(polish)
        .with_callback(recorder.clone())
        .build()
        .expect("chain should build");

    let out = pipeline
        .invoke(&AgentContext::new(), AgentInput::new("write something"))
        .await
        .expect("invoke should succeed");

    assert_eq!(out.status, AgentStatus::Success);
    assert_eq!(out.result, json!("a polished draft"));
    assert_eq!(out.token_usage.total_tokens, 2 * MOCK_USAGE.total_tokens);
    assert!(
        polish_llm
            .last_prompt()
            .is_some_and(|p| p.contains("Question: a rough draft"))
    );
    assert_eq!(recorder.count("start"), 1);
    assert_eq!(recorder.count("finish"), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// § 3  Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// The second identical request is served from cache: the agent runs once,
/// `after` hooks run both times.
#[tokio::test]
async fn middleware_cache_hit_skips_agent() {
    let (agent, llm) = answering("math", "4");
    let cache = Arc::new(CacheMiddleware::new(Duration::from_secs(3600)));
    let after_runs = Arc::new(AtomicUsize::new(0));
    let counter = {
        let after_runs = after_runs.clone();
        FnMiddleware::new("after_counter").on_after(move |_| {
            after_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let chain = MiddlewareChain::new().with(Arc::new(counter)).with(cache.clone());
    let handler = AgentHandler::new(agent);
    let ctx = AgentContext::new();

    let first = chain
        .execute(&ctx, MiddlewareRequest::new(json!("What is 2+2?")), &handler)
        .await
        .expect("first request should succeed");
    let second = chain
        .execute(&ctx, MiddlewareRequest::new(json!("What is 2+2?")), &handler)
        .await
        .expect("second request should succeed");

    assert_eq!(first.metadata.get("cache_hit"), Some(&json!(false)));
    assert_eq!(second.metadata.get("cache_hit"), Some(&json!(true)));
    assert_eq!(second.output, first.output);
    assert_eq!(first.output["result"], json!("4"));
    assert_eq!(llm.call_count(), 1);
    assert_eq!(after_runs.load(Ordering::SeqCst), 2);
    assert_eq!((cache.hits(), cache.misses()), (1, 1));
}

/// `before` hooks run in registration order, `after` hooks in reverse.
#[tokio::test]
async fn middleware_runs_in_onion_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut chain = MiddlewareChain::new();
    for name in ["m1", "m2", "m3"] {
        let before_log = log.clone();
        let after_log = log.clone();
        chain.add(Arc::new(
            FnMiddleware::new(name)
                .on_before(move |_| {
                    before_log.lock().push(format!("before:{name}"));
                    Ok(())
                })
                .on_after(move |_| {
                    after_log.lock().push(format!("after:{name}"));
                    Ok(())
                }),
        ));
    }
    let handler = {
        let log = log.clone();
        handler_fn(move |input| {
            let log = log.clone();
            async move {
                log.lock().push("handler".to_string());
                Ok(input)
            }
        })
    };

    let response = chain
        .execute(&AgentContext::new(), MiddlewareRequest::new(json!({"q": 1})), &handler)
        .await
        .expect("chain should succeed");

    assert_eq!(response.output, json!({"q": 1}));
    assert_eq!(
        *log.lock(),
        vec![
            "before:m1", "before:m2", "before:m3", "handler", "after:m3", "after:m2", "after:m1"
        ]
    );
}
