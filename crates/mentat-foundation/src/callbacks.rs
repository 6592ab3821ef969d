//! 回调分发器
//! Callback dispatcher
//!
//! Runs user callbacks in registration order. The first hook that returns
//! an error aborts dispatch and the error is returned to the engine. A
//! panicking callback is caught at this boundary and surfaces as a
//! `ToolExecution` error instead of unwinding through the engine.

use futures::FutureExt;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ToolArgs};
use mentat_kernel::usage::TokenUsage;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Component tag carried by errors raised from a callback
pub const CALLBACK_COMPONENT: &str = "callback";

/// Whether `err` was raised by a user callback rather than the engine.
pub fn is_callback_abort(err: &AgentError) -> bool {
    matches!(err, AgentError::Contextual { component, .. } if component == CALLBACK_COMPONENT)
}

/// Ordered set of callbacks
#[derive(Clone, Default)]
pub struct CallbackDispatcher {
    callbacks: Vec<Arc<dyn Callback>>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty dispatcher; every hook is a no-op.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn add(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    async fn dispatch<F, Fut>(&self, hook: &'static str, f: F) -> AgentResult<()>
    where
        F: Fn(Arc<dyn Callback>) -> Fut,
        Fut: Future<Output = AgentResult<()>>,
    {
        for cb in &self.callbacks {
            match AssertUnwindSafe(f(cb.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(hook, error = %e, "callback aborted execution");
                    return Err(e.with_component(CALLBACK_COMPONENT).with_operation(hook));
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    tracing::warn!(hook, panic = %msg, "callback panicked");
                    return Err(AgentError::tool_execution(
                        format!("callback:{hook}"),
                        format!("callback panicked: {msg}"),
                    )
                    .with_component(CALLBACK_COMPONENT)
                    .with_operation(hook));
                }
            }
        }
        Ok(())
    }

    pub async fn on_start(&self, input: &AgentInput) -> AgentResult<()> {
        self.dispatch("on_start", |cb| async move { cb.on_start(input).await })
            .await
    }

    pub async fn on_agent_finish(&self, output: &AgentOutput) -> AgentResult<()> {
        self.dispatch("on_agent_finish", |cb| async move {
            cb.on_agent_finish(output).await
        })
        .await
    }

    pub async fn on_llm_start(&self, prompts: &[String], model: &str) -> AgentResult<()> {
        self.dispatch("on_llm_start", |cb| async move {
            cb.on_llm_start(prompts, model).await
        })
        .await
    }

    pub async fn on_llm_end(&self, output: &str, usage: &TokenUsage) -> AgentResult<()> {
        self.dispatch("on_llm_end", |cb| async move { cb.on_llm_end(output, usage).await })
            .await
    }

    pub async fn on_tool_start(&self, name: &str, input: &ToolArgs) -> AgentResult<()> {
        self.dispatch("on_tool_start", |cb| async move {
            cb.on_tool_start(name, input).await
        })
        .await
    }

    pub async fn on_tool_end(&self, name: &str, output: &Value) -> AgentResult<()> {
        self.dispatch("on_tool_end", |cb| async move { cb.on_tool_end(name, output).await })
            .await
    }

    pub async fn on_error(&self, error: &AgentError) -> AgentResult<()> {
        self.dispatch("on_error", |cb| async move { cb.on_error(error).await })
            .await
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mentat_kernel::agent::error::ErrorCode;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_start: bool,
    }

    #[async_trait]
    impl Callback for Recorder {
        async fn on_start(&self, _input: &AgentInput) -> AgentResult<()> {
            self.log.lock().push(format!("{}:start", self.tag));
            if self.fail_on_start {
                return Err(AgentError::ExecutionFailed("rejected".into()));
            }
            Ok(())
        }

        async fn on_tool_end(&self, name: &str, _output: &Value) -> AgentResult<()> {
            self.log.lock().push(format!("{}:tool_end:{name}", self.tag));
            Ok(())
        }
    }

    struct Panicky;

    #[async_trait]
    impl Callback for Panicky {
        async fn on_llm_end(&self, _output: &str, _usage: &TokenUsage) -> AgentResult<()> {
            panic!("boom in callback");
        }
    }

    #[tokio::test]
    async fn test_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CallbackDispatcher::new()
            .with_callback(Arc::new(Recorder {
                tag: "a",
                log: log.clone(),
                ..Default::default()
            }))
            .with_callback(Arc::new(Recorder {
                tag: "b",
                log: log.clone(),
                ..Default::default()
            }));

        dispatcher.on_start(&AgentInput::new("t")).await.unwrap();
        dispatcher.on_tool_end("calc", &Value::Null).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["a:start", "b:start", "a:tool_end:calc", "b:tool_end:calc"]
        );
    }

    #[tokio::test]
    async fn test_first_error_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CallbackDispatcher::new()
            .with_callback(Arc::new(Recorder {
                tag: "a",
                log: log.clone(),
                fail_on_start: true,
            }))
            .with_callback(Arc::new(Recorder {
                tag: "b",
                log: log.clone(),
                ..Default::default()
            }));

        let err = dispatcher.on_start(&AgentInput::new("t")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionFailed);
        assert!(is_callback_abort(&err));
        assert!(!is_callback_abort(&AgentError::Cancelled));
        assert_eq!(*log.lock(), vec!["a:start"]);
    }

    #[tokio::test]
    async fn test_panic_becomes_tool_execution_error() {
        let dispatcher = CallbackDispatcher::new().with_callback(Arc::new(Panicky));
        let err = dispatcher
            .on_llm_end("out", &TokenUsage::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolExecution);
        assert!(err.to_string().contains("boom in callback"));
    }

    #[tokio::test]
    async fn test_empty_dispatcher_is_noop() {
        let dispatcher = CallbackDispatcher::none();
        assert!(dispatcher.is_empty());
        dispatcher.on_error(&AgentError::Cancelled).await.unwrap();
    }
}
