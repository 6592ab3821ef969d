//! 内置中间件
//! Built-in middlewares
//!
//! - [`LoggingMiddleware`]: structured events on every hook
//! - [`TimingMiddleware`]: per-request duration plus a rolling mean
//! - [`RetryMiddleware`]: classifies failures and recommends a retry
//! - [`CacheMiddleware`]: TTL response cache keyed by a hash of the input
//! - [`ObservabilityMiddleware`]: request span events and counters
//! - [`FnMiddleware`]: closure adapter

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::middleware::{Middleware, MiddlewareRequest, MiddlewareResponse};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const CACHE_HIT_KEY: &str = "cache_hit";
pub const CACHE_KEY_KEY: &str = "cache_key";
pub const TIMING_START_KEY: &str = "timing_start_ms";
pub const TIMING_DURATION_KEY: &str = "timing_duration_ms";
pub const RETRY_ATTEMPTS_KEY: &str = "retry_attempts";
pub const RETRY_RECOMMENDED_KEY: &str = "retry_recommended";
pub const OBSERVABILITY_SPAN_KEY: &str = "observability_span";

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(&self, ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        tracing::info!(
            execution_id = %ctx.execution_id,
            request_id = %request.id,
            headers = request.headers.len(),
            "request started"
        );
        Ok(())
    }

    async fn after(&self, ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        tracing::info!(
            execution_id = %ctx.execution_id,
            duration_ms = response.duration_ms,
            success = response.is_success(),
            "request finished"
        );
        Ok(())
    }

    async fn on_error(&self, ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
        tracing::warn!(execution_id = %ctx.execution_id, code = %error.code(), error = %error, "request failed");
        Some(error)
    }
}

// ============================================================================
// Timing
// ============================================================================

pub const DEFAULT_TIMING_WINDOW: usize = 100;

/// 计时中间件
/// Timing middleware with a rolling mean over the last `window` requests
#[derive(Debug)]
pub struct TimingMiddleware {
    window: usize,
    samples: Mutex<VecDeque<u64>>,
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_TIMING_WINDOW)
    }
}

impl TimingMiddleware {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(VecDeque::with_capacity(window.max(1))),
        }
    }

    /// Rolling mean, `None` before the first sample.
    pub fn average_latency(&self) -> Option<Duration> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let total: u64 = samples.iter().sum();
        Some(Duration::from_millis(total / samples.len() as u64))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    fn record(&self, duration_ms: u64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(duration_ms);
    }
}

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    async fn before(&self, _ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        request
            .metadata
            .insert(TIMING_START_KEY.to_string(), json!(Utc::now().timestamp_millis()));
        Ok(())
    }

    async fn after(&self, _ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        let duration_ms = match response.metadata.get(TIMING_START_KEY).and_then(Value::as_i64) {
            Some(start) => (Utc::now().timestamp_millis() - start).max(0) as u64,
            None => response.duration_ms,
        };
        response
            .metadata
            .insert(TIMING_DURATION_KEY.to_string(), json!(duration_ms));
        self.record(duration_ms);
        Ok(())
    }
}

// ============================================================================
// Retry
// ============================================================================

/// 重试决策
/// Retry decision for a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub attempts: u32,
    pub delay: Duration,
}

type RetryCondition = Arc<dyn Fn(&AgentError) -> bool + Send + Sync>;

/// 重试中间件
/// Retry middleware
///
/// It only classifies. The caller owns the retry loop and reports the
/// attempt number through the `retry_attempts` state key; the decision is
/// attached to the error context and to response metadata.
pub struct RetryMiddleware {
    max_retries: u32,
    base_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    jitter: Duration,
    condition: RetryCondition,
}

impl std::fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryMiddleware {
    /// Retries transient failures up to `max_retries` times.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
            condition: Arc::new(AgentError::is_transient),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&AgentError) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    /// Exponential backoff from `base_delay`, plus up to `jitter` of noise.
    pub fn decide(&self, error: &AgentError, attempts: u32) -> RetryDecision {
        let retry = !error.is_cancelled() && attempts < self.max_retries && (self.condition)(error);
        let mut delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempts.min(16)));
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms));
        }
        RetryDecision {
            retry,
            attempts,
            delay,
        }
    }

    fn attempts(ctx: &AgentContext) -> u32 {
        ctx.state()
            .get_opt(RETRY_ATTEMPTS_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }
}

/// Whether a middleware marked `error` as worth retrying.
pub fn retry_recommended(error: &AgentError) -> bool {
    error
        .to_info()
        .context
        .get(RETRY_RECOMMENDED_KEY)
        .is_some_and(|v| v == "true")
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn before(&self, ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        request
            .metadata
            .insert(RETRY_ATTEMPTS_KEY.to_string(), json!(Self::attempts(ctx)));
        Ok(())
    }

    async fn after(&self, _ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        response
            .metadata
            .insert(RETRY_RECOMMENDED_KEY.to_string(), json!(false));
        Ok(())
    }

    async fn on_error(&self, ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
        let decision = self.decide(&error, Self::attempts(ctx));
        if decision.retry {
            tracing::debug!(attempts = decision.attempts, delay_ms = decision.delay.as_millis() as u64, "retry recommended");
        }
        Some(
            error
                .with_context(RETRY_RECOMMENDED_KEY, decision.retry)
                .with_context(RETRY_ATTEMPTS_KEY, decision.attempts)
                .with_context("retry_delay_ms", decision.delay.as_millis()),
        )
    }
}

// ============================================================================
// Cache
// ============================================================================

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// 缓存中间件
/// Response cache keyed by the SHA-256 of the serialised request input
///
/// Only successful responses are stored.
#[derive(Debug)]
pub struct CacheMiddleware {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CacheMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl CacheMiddleware {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache_key(input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        hit
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn before(&self, _ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        let key = Self::cache_key(&request.input);
        let cached = self.lookup(&key);
        let hit = cached.is_some();
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        request.cached_response = cached;
        request.metadata.insert(CACHE_HIT_KEY.to_string(), json!(hit));
        request.metadata.insert(CACHE_KEY_KEY.to_string(), json!(key));
        Ok(())
    }

    async fn after(&self, ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        if ctx.is_cancelled() || !response.is_success() {
            return Ok(());
        }
        let hit = response
            .metadata
            .get(CACHE_HIT_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if hit {
            return Ok(());
        }
        if let Some(key) = response.metadata.get(CACHE_KEY_KEY).and_then(Value::as_str) {
            self.entries.insert(
                key.to_string(),
                CacheEntry {
                    value: response.output.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        Ok(())
    }
}

// ============================================================================
// Observability
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub average_latency_ms: f64,
}

/// Spans left open longer than this (a cancelled request) are dropped.
const STALE_SPAN: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct OpenSpan {
    execution_id: String,
    span: tracing::Span,
    opened: Instant,
}

/// 可观测性中间件
/// Observability middleware: request span events and counters
///
/// `before` opens a `middleware.request` span and parks it under a key
/// written to [`OBSERVABILITY_SPAN_KEY`]; `after` and `on_error` emit their
/// events inside that same span and close it.
#[derive(Debug, Default)]
pub struct ObservabilityMiddleware {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
    spans: DashMap<String, OpenSpan>,
}

impl ObservabilityMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes,
            errors: self.errors.load(Ordering::Relaxed),
            average_latency_ms: if successes == 0 {
                0.0
            } else {
                total as f64 / successes as f64
            },
        }
    }
}

#[async_trait]
impl Middleware for ObservabilityMiddleware {
    fn name(&self) -> &str {
        "observability"
    }

    async fn before(&self, ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.spans.retain(|_, open| open.opened.elapsed() < STALE_SPAN);
        let span = tracing::info_span!(
            "middleware.request",
            execution_id = %ctx.execution_id,
            trace_id = ctx.trace_id.as_deref().unwrap_or(""),
            request_id = %request.id,
        );
        span.in_scope(|| tracing::debug!("span opened"));
        let key = Uuid::new_v4().to_string();
        request
            .metadata
            .insert("trace_execution_id".to_string(), json!(ctx.execution_id));
        request
            .metadata
            .insert(OBSERVABILITY_SPAN_KEY.to_string(), json!(key));
        self.spans.insert(
            key,
            OpenSpan {
                execution_id: ctx.execution_id.clone(),
                span,
                opened: Instant::now(),
            },
        );
        Ok(())
    }

    async fn after(&self, ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(response.duration_ms, Ordering::Relaxed);
        // a masked handler error already closed the span in on_error
        let span = response
            .metadata
            .get(OBSERVABILITY_SPAN_KEY)
            .and_then(Value::as_str)
            .and_then(|key| self.spans.remove(key))
            .map(|(_, open)| open.span)
            .unwrap_or_else(|| tracing::info_span!("middleware.request", execution_id = %ctx.execution_id));
        span.in_scope(|| {
            tracing::info!(duration_ms = response.duration_ms, "request recorded");
        });
        Ok(())
    }

    async fn on_error(&self, ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let key = self
            .spans
            .iter()
            .find(|open| open.execution_id == ctx.execution_id)
            .map(|open| open.key().clone());
        let span = key
            .and_then(|key| self.spans.remove(&key))
            .map(|(_, open)| open.span)
            .unwrap_or_else(|| tracing::error_span!("middleware.error", execution_id = %ctx.execution_id));
        span.in_scope(|| tracing::error!(code = %error.code(), error = %error, "request error"));
        Some(error)
    }
}

impl ObservabilityMiddleware {
    /// Requests whose span is still open
    pub fn open_spans(&self) -> usize {
        self.spans.len()
    }
}

// ============================================================================
// Closure adapter
// ============================================================================

type BeforeFn = Box<dyn Fn(&mut MiddlewareRequest) -> AgentResult<()> + Send + Sync>;
type AfterFn = Box<dyn Fn(&mut MiddlewareResponse) -> AgentResult<()> + Send + Sync>;
type ErrorFn = Box<dyn Fn(AgentError) -> Option<AgentError> + Send + Sync>;

/// 闭包中间件
/// Middleware assembled from synchronous closures
pub struct FnMiddleware {
    name: String,
    before: Option<BeforeFn>,
    after: Option<AfterFn>,
    error: Option<ErrorFn>,
}

impl FnMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: None,
            after: None,
            error: None,
        }
    }

    pub fn on_before<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MiddlewareRequest) -> AgentResult<()> + Send + Sync + 'static,
    {
        self.before = Some(Box::new(f));
        self
    }

    pub fn on_after<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MiddlewareResponse) -> AgentResult<()> + Send + Sync + 'static,
    {
        self.after = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(AgentError) -> Option<AgentError> + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before(&self, _ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        match &self.before {
            Some(f) => f(request),
            None => Ok(()),
        }
    }

    async fn after(&self, _ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        match &self.after {
            Some(f) => f(response),
            None => Ok(()),
        }
    }

    async fn on_error(&self, _ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
        match &self.error {
            Some(f) => f(error),
            None => Some(error),
        }
    }
}
