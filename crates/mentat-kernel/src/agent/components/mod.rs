//! Agent 组件模块
//! Agent component modules
//!
//! 定义 Agent 的可插拔组件接口
//! Pluggable component interfaces for agents

pub mod tool;

pub use tool::{
    DEFAULT_MAX_STRING_LENGTH, Tool, ToolDescriptor, ToolInput, ToolOutput, ToolStream,
};
