//! Agent 执行上下文
//! Agent execution context
//!
//! 每个入口都接收一个 [`AgentContext`]：执行 ID、追踪 ID、取消令牌、
//! 可选截止时间和共享状态容器。
//! Every entry point takes an [`AgentContext`]: execution id, trace id,
//! cancellation token, optional deadline and a shared state container.
//!
//! # 示例 / Example
//!
//! ```rust,ignore
//! use mentat_kernel::agent::AgentContext;
//! use std::time::Duration;
//!
//! let ctx = AgentContext::new().with_timeout(Duration::from_secs(5));
//! let reply = ctx.guard(client.complete(&ctx, request)).await?;
//! ```

use crate::agent::error::{AgentError, AgentResult};
use crate::state::StateContainer;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 核心执行上下文
/// Core execution context
///
/// Cheap to clone; clones share the cancellation token and the state.
#[derive(Debug)]
pub struct AgentContext {
    /// 执行 ID (唯一标识本次执行)
    /// Execution id, unique per execution
    pub execution_id: String,
    /// 追踪 ID (跨 Agent 传播)
    /// Trace id, propagated across agents
    pub trace_id: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    state: StateContainer,
}

impl Clone for AgentContext {
    fn clone(&self) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            trace_id: self.trace_id.clone(),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            state: self.state.share(),
        }
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentContext {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::now_v7().to_string(),
            trace_id: None,
            cancel: CancellationToken::new(),
            deadline: None,
            state: StateContainer::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_state(mut self, state: StateContainer) -> Self {
        self.state = state;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 收紧截止时间 (不会放宽已有的截止时间)
    /// Tighten the deadline; an earlier existing deadline is kept
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// 创建子上下文：共享状态，子取消令牌
    /// Child context sharing state, with a child cancellation token
    pub fn child(&self) -> Self {
        Self {
            execution_id: Uuid::now_v7().to_string(),
            trace_id: self.trace_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            state: self.state.share(),
        }
    }

    /// 创建隔离子上下文：状态被复制
    /// Child context with an isolated copy of the state, for parallel work
    pub fn fork(&self) -> Self {
        Self {
            state: self.state.fork(),
            ..self.child()
        }
    }

    pub fn state(&self) -> &StateContainer {
        &self.state
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 取消本上下文及所有子上下文
    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// 若已取消或超时则返回错误
    /// Fail fast when cancelled or past the deadline
    pub fn check(&self) -> AgentResult<()> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if let Some(remaining) = self.remaining() {
            if remaining.is_zero() {
                return Err(AgentError::timeout(0));
            }
        }
        Ok(())
    }

    /// 让 future 与取消和截止时间竞争
    /// Race a future against cancellation and the deadline
    pub async fn guard<F, T>(&self, fut: F) -> AgentResult<T>
    where
        F: Future<Output = AgentResult<T>>,
    {
        let started = Instant::now();
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        Err(AgentError::timeout(started.elapsed().as_millis() as u64))
                    }
                    res = fut => res,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                    res = fut => res,
                }
            }
        }
    }
}
