//! 统一 Agent 框架
//! Unified Agent Framework
//!
//! # 架构概述
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Agent Trait                          │
//! │        (name, capabilities, invoke, invoke_fast, stream)     │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!      ┌──────────────┬──────────┴─────────┬──────────────────┐
//!      ▼              ▼                    ▼                  ▼
//! ┌──────────┐  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Tool   │  │   Callback   │   │ AgentContext │   │  AgentError  │
//! │   工具    │  │     回调     │   │    上下文     │   │     错误      │
//! └──────────┘  └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! # 模块结构
//! # Module Structure
//!
//! - `core` - Agent trait
//! - `types` - AgentInput, AgentOutput, ReasoningStep, ToolCallRecord
//! - `context` - AgentContext 执行上下文 / execution context
//! - `callback` - Callback 生命周期回调 / lifecycle hooks
//! - `error` - 错误类型定义 / error types
//! - `components` - 组件 trait (Tool)

// 核心模块
// Core modules
pub mod callback;
pub mod context;
pub mod core;
pub mod error;
pub mod types;

// 组件模块
// Component modules
pub mod components;

pub use callback::Callback;
pub use components::tool::{Tool, ToolDescriptor, ToolInput, ToolOutput, ToolStream};
pub use context::AgentContext;
pub use core::{Agent, AgentStream, SharedAgent};
pub use error::{AgentError, AgentResult, ErrorCode, ErrorInfo};
pub use types::{
    AgentInput, AgentOutput, AgentStatus, AgentStreamChunk, ReasoningStep, ToolArgs,
    ToolCallRecord, value_to_text,
};

/// Prelude 模块 - 常用类型导入
/// Prelude module - Common type imports
pub mod prelude {
    pub use super::callback::Callback;
    pub use super::components::tool::{Tool, ToolDescriptor, ToolInput, ToolOutput};
    pub use super::context::AgentContext;
    pub use super::core::{Agent, AgentStream, SharedAgent};
    pub use super::error::{AgentError, AgentResult, ErrorCode};
    pub use super::types::{
        AgentInput, AgentOutput, AgentStatus, ReasoningStep, ToolArgs, ToolCallRecord,
    };
    pub use crate::usage::TokenUsage;
    pub use async_trait::async_trait;
}
