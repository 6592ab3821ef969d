//! Agent 基础构建块
//! Agent building blocks
//!
//! 包含 Agent 基础实现、执行轨迹与工具系统
//! Agent base, execution trace and the tool system

pub mod base;
pub mod prompt;
pub mod tools;
pub mod trace;

pub use base::{AgentBase, AgentStats, ExecutionScope};
pub use trace::ExecutionTrace;

// 从 Kernel 层重导出核心类型
// Re-export kernel core types
pub use mentat_kernel::agent::{
    Agent, AgentContext, AgentError, AgentInput, AgentOutput, AgentResult, AgentStatus,
    SharedAgent,
};
