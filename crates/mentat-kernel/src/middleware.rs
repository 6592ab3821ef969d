//! 中间件契约
//! Middleware contract
//!
//! A middleware intercepts a handler with three hooks. The chain that
//! drives them lives in `mentat-foundation`; this module only fixes the
//! envelope types and the traits.
//!
//! ```text
//! m1.before → m2.before → m3.before → handler → m3.after → m2.after → m1.after
//! ```

use crate::agent::context::AgentContext;
use crate::agent::error::{AgentError, AgentResult, ErrorInfo};
use crate::state::StateContainer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// 中间件请求信封
/// Middleware request envelope
#[derive(Debug, Clone)]
pub struct MiddlewareRequest {
    pub id: String,
    pub input: Value,
    pub state: Option<StateContainer>,
    pub metadata: HashMap<String, Value>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Set by a `before` hook to short-circuit the handler
    pub cached_response: Option<Value>,
}

impl Default for MiddlewareRequest {
    fn default() -> Self {
        Self {
            id: String::new(),
            input: Value::Null,
            state: None,
            metadata: HashMap::new(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
            cached_response: None,
        }
    }
}

impl MiddlewareRequest {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: StateContainer) -> Self {
        self.state = Some(state);
        self
    }

    /// 清空以便复用；保留 map 的已分配容量
    /// Zero the envelope for reuse, keeping map allocations
    pub fn reset(&mut self) {
        self.id.clear();
        self.input = Value::Null;
        self.state = None;
        self.metadata.clear();
        self.headers.clear();
        self.timestamp = Utc::now();
        self.cached_response = None;
    }
}

/// 中间件响应信封
/// Middleware response envelope
#[derive(Debug, Clone)]
pub struct MiddlewareResponse {
    pub output: Value,
    pub metadata: HashMap<String, Value>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<ErrorInfo>,
}

impl Default for MiddlewareResponse {
    fn default() -> Self {
        Self {
            output: Value::Null,
            metadata: HashMap::new(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
            error: None,
        }
    }
}

impl MiddlewareResponse {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 清空以便复用
    /// Zero the envelope for reuse, keeping map allocations
    pub fn reset(&mut self) {
        self.output = Value::Null;
        self.metadata.clear();
        self.headers.clear();
        self.timestamp = Utc::now();
        self.duration_ms = 0;
        self.error = None;
    }
}

/// 中间件
/// Middleware
///
/// `on_error` returning `None` suppresses the error.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, ctx: &AgentContext, request: &mut MiddlewareRequest) -> AgentResult<()> {
        let _ = (ctx, request);
        Ok(())
    }

    async fn after(&self, ctx: &AgentContext, response: &mut MiddlewareResponse) -> AgentResult<()> {
        let _ = (ctx, response);
        Ok(())
    }

    async fn on_error(&self, ctx: &AgentContext, error: AgentError) -> Option<AgentError> {
        let _ = ctx;
        Some(error)
    }
}

/// 被中间件包裹的处理器
/// Handler wrapped by a middleware chain
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &AgentContext, request: &MiddlewareRequest) -> AgentResult<Value>;
}
