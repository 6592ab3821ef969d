//! 中间件管线
//! Middleware pipeline
//!
//! The contract (`Middleware`, `Handler`, envelopes) lives in
//! `mentat_kernel::middleware`; this module provides the chain that drives
//! it, the envelope pool and the built-in middlewares.

pub mod builtin;
pub mod chain;
pub mod pool;

pub use builtin::{
    CacheMiddleware, FnMiddleware, LoggingMiddleware, ObservabilityMiddleware,
    ObservabilitySnapshot, RetryDecision, RetryMiddleware, TimingMiddleware, retry_recommended,
};
pub use chain::{AgentHandler, FnHandler, MiddlewareChain, handler_fn};
pub use mentat_kernel::middleware::{Handler, Middleware, MiddlewareRequest, MiddlewareResponse};
pub use pool::{EnvelopePool, PoolStats};
