//! Mentat Kernel
//!
//! Contracts and data model for LLM agent orchestration: errors, token
//! accounting, agent input/output, execution context, shared state, the
//! tool, callback, middleware and LLM client traits, and config loading.
//! Engines live in `mentat-foundation`.

// error module
pub mod error;

// token accounting
pub mod usage;

// shared state container
pub mod state;

// Unified Agent Framework (统一 Agent 框架)
pub mod agent;

// LLM client contract
pub mod llm;

// middleware contract
pub mod middleware;

// config module
#[cfg(feature = "config")]
pub mod config;

pub use agent::prelude::*;
pub use state::StateContainer;
pub use usage::TokenUsage;
