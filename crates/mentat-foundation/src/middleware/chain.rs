//! 中间件链
//! Middleware chain
//!
//! Drives `before` hooks in registration order, the handler, then `after`
//! hooks in reverse order. Hook errors are offered to the same middleware's
//! `on_error`; `None` suppresses and continues, `Some` aborts. Handler
//! errors are passed through every middleware's `on_error` in order.

use super::pool::EnvelopePool;
use async_trait::async_trait;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::SharedAgent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::AgentInput;
use mentat_kernel::middleware::{Handler, Middleware, MiddlewareRequest, MiddlewareResponse};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    pool: Option<Arc<EnvelopePool>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &self.names())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Draw envelopes from `pool`. Requests go back to the pool when
    /// [`Self::execute`] returns; responses with [`Self::release`].
    pub fn with_pool(mut self, pool: Arc<EnvelopePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.middlewares.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Return a response envelope to the pool, if one is configured.
    pub fn release(&self, response: MiddlewareResponse) {
        if let Some(pool) = &self.pool {
            pool.release_response(response);
        }
    }

    /// 获取请求信封
    /// Request envelope carrying `input`, drawn from the pool when one is configured
    pub fn request(&self, input: Value) -> MiddlewareRequest {
        let mut request = match &self.pool {
            Some(pool) => pool.acquire_request(),
            None => MiddlewareRequest::default(),
        };
        request.input = input;
        request
    }

    fn fresh_response(&self) -> MiddlewareResponse {
        match &self.pool {
            Some(pool) => pool.acquire_response(),
            None => MiddlewareResponse::default(),
        }
    }

    /// 执行中间件链
    /// Run `handler` wrapped by the chain. The request envelope returns to
    /// the pool on every exit path.
    pub async fn execute(
        &self,
        ctx: &AgentContext,
        mut request: MiddlewareRequest,
        handler: &dyn Handler,
    ) -> AgentResult<MiddlewareResponse> {
        let result = self.run(ctx, &mut request, handler).await;
        if let Some(pool) = &self.pool {
            pool.release_request(request);
        }
        result
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        request: &mut MiddlewareRequest,
        handler: &dyn Handler,
    ) -> AgentResult<MiddlewareResponse> {
        for m in &self.middlewares {
            ctx.check()?;
            if let Err(e) = m.before(ctx, request).await {
                match m.on_error(ctx, e).await {
                    None => tracing::debug!(middleware = m.name(), "before error suppressed"),
                    Some(e) => return Err(e),
                }
            }
        }

        let mut response = self.fresh_response();
        response.metadata.extend(request.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        response.headers.extend(request.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        match request.cached_response.take() {
            Some(cached) => {
                response.output = cached;
                response.duration_ms = 0;
            }
            None => {
                let started = Instant::now();
                let result = ctx.guard(handler.handle(ctx, request)).await;
                response.duration_ms = started.elapsed().as_millis() as u64;
                match result {
                    Ok(output) => response.output = output,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        let mut pending = Some(e);
                        for m in &self.middlewares {
                            let Some(e) = pending.take() else { break };
                            pending = m.on_error(ctx, e).await;
                        }
                        if let Some(e) = pending {
                            return Err(e);
                        }
                        tracing::debug!("handler error masked by middleware");
                    }
                }
            }
        }

        for m in self.middlewares.iter().rev() {
            // cancelled runs skip the after phase
            ctx.check()?;
            if let Err(e) = m.after(ctx, &mut response).await {
                match m.on_error(ctx, e).await {
                    None => tracing::debug!(middleware = m.name(), "after error suppressed"),
                    Some(e) => return Err(e),
                }
            }
        }
        Ok(response)
    }
}

/// 闭包处理器
/// Handler backed by an async closure over the request input
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Value>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Value>> + Send,
{
    async fn handle(&self, _ctx: &AgentContext, request: &MiddlewareRequest) -> AgentResult<Value> {
        (self.f)(request.input.clone()).await
    }
}

/// Agent 处理器
/// Runs an agent as the chain's handler.
///
/// A string input becomes the task. An object input reads `task` and
/// takes the remaining fields as context. The agent output is returned
/// serialised.
pub struct AgentHandler {
    agent: SharedAgent,
}

impl AgentHandler {
    pub fn new(agent: SharedAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Handler for AgentHandler {
    async fn handle(&self, ctx: &AgentContext, request: &MiddlewareRequest) -> AgentResult<Value> {
        let input = match &request.input {
            Value::String(task) => AgentInput::new(task.clone()),
            Value::Object(map) => {
                let task = map.get("task").and_then(Value::as_str).unwrap_or_default();
                map.iter()
                    .filter(|(k, _)| k.as_str() != "task")
                    .fold(AgentInput::new(task), |input, (k, v)| {
                        input.with_context(k.clone(), v.clone())
                    })
            }
            other => {
                return Err(AgentError::ConfigInvalid(format!(
                    "agent handler expects a string or object input, got {other}"
                )));
            }
        };
        let output = self.agent.invoke(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::builtin::FnMiddleware;
    use mentat_kernel::agent::error::ErrorCode;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recording {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
        suppress: bool,
    }

    impl Recording {
        fn new(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                tag,
                log: log.clone(),
                fail_before: false,
                suppress: false,
            }
        }
    }

    #[async_trait]
    impl Middleware for Recording {
        fn name(&self) -> &str {
            self.tag
        }
        async fn before(&self, _ctx: &AgentContext, _req: &mut MiddlewareRequest) -> AgentResult<()> {
            self.log.lock().push(format!("{}.before", self.tag));
            if self.fail_before {
                return Err(AgentError::ExecutionFailed(format!("{} rejected", self.tag)));
            }
            Ok(())
        }
        async fn after(&self, _ctx: &AgentContext, _resp: &mut MiddlewareResponse) -> AgentResult<()> {
            self.log.lock().push(format!("{}.after", self.tag));
            Ok(())
        }
        async fn on_error(&self, _ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
            self.log.lock().push(format!("{}.error", self.tag));
            if self.suppress {
                None
            } else {
                Some(error.with_context("seen_by", self.tag))
            }
        }
    }

    fn logging_handler(log: Arc<Mutex<Vec<String>>>) -> impl Handler {
        handler_fn(move |input| {
            let log = log.clone();
            async move {
                log.lock().push("h".to_string());
                Ok(input)
            }
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recording::new("m1", &log)))
            .with(Arc::new(Recording::new("m2", &log)))
            .with(Arc::new(Recording::new("m3", &log)));
        let ctx = AgentContext::new();

        let resp = chain
            .execute(&ctx, MiddlewareRequest::new(json!("x")), &logging_handler(log.clone()))
            .await
            .unwrap();
        assert_eq!(resp.output, json!("x"));
        assert_eq!(
            *log.lock(),
            vec!["m1.before", "m2.before", "m3.before", "h", "m3.after", "m2.after", "m1.after"]
        );
    }

    #[tokio::test]
    async fn test_before_error_aborts_unless_suppressed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = Recording {
            fail_before: true,
            ..Recording::new("m1", &log)
        };
        let chain = MiddlewareChain::new()
            .with(Arc::new(failing))
            .with(Arc::new(Recording::new("m2", &log)));
        let ctx = AgentContext::new();

        let err = chain
            .execute(&ctx, MiddlewareRequest::new(json!("x")), &logging_handler(log.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionFailed);
        assert_eq!(*log.lock(), vec!["m1.before", "m1.error"]);

        log.lock().clear();
        let suppressing = Recording {
            fail_before: true,
            suppress: true,
            ..Recording::new("m1", &log)
        };
        let chain = MiddlewareChain::new().with(Arc::new(suppressing));
        chain
            .execute(&ctx, MiddlewareRequest::new(json!("x")), &logging_handler(log.clone()))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["m1.before", "m1.error", "h", "m1.after"]);
    }

    #[tokio::test]
    async fn test_handler_error_visits_every_error_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recording::new("m1", &log)))
            .with(Arc::new(Recording::new("m2", &log)));
        let ctx = AgentContext::new();
        let handler = handler_fn(|_input| async { Err::<Value, _>(AgentError::llm("provider down")) });

        let err = chain
            .execute(&ctx, MiddlewareRequest::new(json!("x")), &handler)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::LlmCall);
        assert_eq!(err.to_info().context["seen_by"], "m2");
        assert_eq!(*log.lock(), vec!["m1.before", "m2.before", "m1.error", "m2.error"]);
    }

    #[tokio::test]
    async fn test_cancelled_skips_after_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new().with(Arc::new(Recording::new("m1", &log)));
        let ctx = AgentContext::new();
        let cancel_ctx = ctx.clone();
        let handler = handler_fn(move |_input| {
            let ctx = cancel_ctx.clone();
            async move {
                ctx.cancel();
                Ok(json!("late"))
            }
        });

        let err = chain
            .execute(&ctx, MiddlewareRequest::new(json!("x")), &handler)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(*log.lock(), vec!["m1.before"]);
    }

    #[tokio::test]
    async fn test_pooled_responses_are_recycled() {
        let pool = Arc::new(EnvelopePool::new(4));
        let tagger = FnMiddleware::new("tagger").on_before(|req| {
            req.metadata.insert("tagged".into(), json!(true));
            Ok(())
        });
        let chain = MiddlewareChain::new()
            .with(Arc::new(tagger))
            .with_pool(pool.clone());
        let ctx = AgentContext::new();
        let handler = handler_fn(|input| async move { Ok(input) });

        let resp = chain
            .execute(&ctx, MiddlewareRequest::new(json!(1)), &handler)
            .await
            .unwrap();
        assert_eq!(resp.metadata["tagged"], json!(true));
        chain.release(resp);

        let resp = chain
            .execute(&ctx, MiddlewareRequest::new(json!(2)), &handler)
            .await
            .unwrap();
        assert_eq!(resp.output, json!(2));
        assert_eq!(pool.stats().reused, 1);
    }

    #[tokio::test]
    async fn test_pooled_requests_return_on_every_path() {
        let pool = Arc::new(EnvelopePool::new(4));
        let ctx = AgentContext::new();
        let chain = MiddlewareChain::new().with_pool(pool.clone());

        let echo = handler_fn(|input| async move { Ok(input) });
        let request = chain.request(json!("first"));
        chain.execute(&ctx, request, &echo).await.unwrap();
        assert_eq!(pool.stats().idle_requests, 1);

        // the recycled envelope comes back zeroed apart from the new input
        let failing = handler_fn(|_input| async { Err::<Value, _>(AgentError::llm("down")) });
        let request = chain.request(json!("second"));
        assert!(request.metadata.is_empty());
        assert_eq!(request.input, json!("second"));
        chain.execute(&ctx, request, &failing).await.unwrap_err();
        assert_eq!(pool.stats().idle_requests, 1);

        let cached = FnMiddleware::new("cached").on_before(|req| {
            req.cached_response = Some(json!("from cache"));
            Ok(())
        });
        let chain = chain.with(Arc::new(cached));
        let request = chain.request(json!("third"));
        let resp = chain.execute(&ctx, request, &failing).await.unwrap();
        assert_eq!(resp.output, json!("from cache"));
        assert_eq!(pool.stats().idle_requests, 1);

        let cancelled = AgentContext::new();
        cancelled.cancel();
        let request = chain.request(json!("fourth"));
        assert!(chain.execute(&cancelled, request, &echo).await.unwrap_err().is_cancelled());

        let stats = pool.stats();
        assert_eq!(stats.idle_requests, 1);
        // one request allocation, reused three times
        assert_eq!(stats.reused, 3);
    }
}
