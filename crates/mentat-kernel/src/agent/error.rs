//! Agent 错误类型定义
//! Agent error types
//!
//! 统一的 Agent 错误处理：每个错误携带错误码、组件、操作和上下文
//! Unified agent error handling: every error carries a code, component,
//! operation and key/value context

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Agent 操作结果类型
/// Agent operation result type
pub type AgentResult<T> = Result<T, AgentError>;

/// 错误码
/// Error code, the stable tag of an [`AgentError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    ConfigInvalid,
    ToolNotFound,
    ToolValidation,
    ToolExecution,
    ParserFailed,
    LlmCall,
    Timeout,
    Cancelled,
    CycleDetected,
    ExecutionUnsafe,
    NotFound,
    AlreadyExists,
    ExecutionFailed,
    Serialization,
    Io,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "config_invalid",
            ErrorCode::ToolNotFound => "tool_not_found",
            ErrorCode::ToolValidation => "tool_validation",
            ErrorCode::ToolExecution => "tool_execution",
            ErrorCode::ParserFailed => "parser_failed",
            ErrorCode::LlmCall => "llm_call",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::CycleDetected => "cycle_detected",
            ErrorCode::ExecutionUnsafe => "execution_unsafe",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::ExecutionFailed => "execution_failed",
            ErrorCode::Serialization => "serialization",
            ErrorCode::Io => "io",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent 错误类型
/// Agent error type
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// 配置无效 (构造时致命)
    /// Invalid configuration, fatal at construction
    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    /// 工具未找到
    /// Tool not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// 工具参数校验失败
    /// Tool argument validation failed
    #[error("Tool validation failed: {tool_name}: {message}")]
    ToolValidation { tool_name: String, message: String },

    /// 工具执行失败
    /// Tool execution failed
    #[error("Tool execution failed: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    /// 推理响应解析失败
    /// Reasoning response could not be parsed
    #[error("Parser failed: {0}")]
    ParserFailed(String),

    /// LLM 调用失败
    /// LLM provider call failed
    #[error("LLM call failed: {message}")]
    LlmCall { message: String, transient: bool },

    /// 超时错误
    /// Deadline exceeded
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// 已取消
    /// Cancelled through the execution context
    #[error("Operation was cancelled")]
    Cancelled,

    /// 图中检测到环
    /// Cycle found in a thought graph
    #[error("Cycle detected at node {node_id}")]
    CycleDetected { node_id: String },

    /// 代码不安全
    /// Generated code rejected by the safety validator
    #[error("Unsafe code rejected: {0}")]
    ExecutionUnsafe(String),

    /// 资源未找到 (子 Agent 等)
    /// Resource not found (sub-agent, record, ...)
    #[error("Not found: {0}")]
    NotFound(String),

    /// 重复注册
    /// Duplicate registration
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Agent 执行失败
    /// Agent execution failed
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    /// 序列化错误
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO 错误
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// 内部错误
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// 带组件/操作上下文的错误
    /// Error wrapped with component / operation context
    #[error("[{component}::{operation}] {inner}")]
    Contextual {
        #[source]
        inner: Box<AgentError>,
        component: String,
        operation: String,
        context: BTreeMap<String, String>,
    },
}

impl AgentError {
    /// 创建工具执行失败错误
    /// Create a tool execution error
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// 创建工具校验失败错误
    /// Create a tool validation error
    pub fn tool_validation(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolValidation {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Permanent LLM failure (auth, invalid request)
    pub fn llm(message: impl Into<String>) -> Self {
        Self::LlmCall {
            message: message.into(),
            transient: false,
        }
    }

    /// Transient LLM failure (rate limit, transport)
    pub fn llm_transient(message: impl Into<String>) -> Self {
        Self::LlmCall {
            message: message.into(),
            transient: true,
        }
    }

    /// 创建超时错误
    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn cycle_detected(node_id: impl Into<String>) -> Self {
        Self::CycleDetected {
            node_id: node_id.into(),
        }
    }

    /// Rebuild an error from a code and message, e.g. from an [`ErrorInfo`].
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::ConfigInvalid => Self::ConfigInvalid(message),
            ErrorCode::ToolNotFound => Self::ToolNotFound(message),
            ErrorCode::ToolValidation => Self::tool_validation("", message),
            ErrorCode::ToolExecution => Self::tool_execution("", message),
            ErrorCode::ParserFailed => Self::ParserFailed(message),
            ErrorCode::LlmCall => Self::llm(message),
            ErrorCode::Timeout => Self::Timeout { duration_ms: 0 },
            ErrorCode::Cancelled => Self::Cancelled,
            ErrorCode::CycleDetected => Self::cycle_detected(message),
            ErrorCode::ExecutionUnsafe => Self::ExecutionUnsafe(message),
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::AlreadyExists => Self::AlreadyExists(message),
            ErrorCode::ExecutionFailed => Self::ExecutionFailed(message),
            ErrorCode::Serialization => Self::Serialization(message),
            ErrorCode::Io => Self::Io(message),
            ErrorCode::Internal => Self::Internal(message),
        }
    }

    /// 错误码 (穿透上下文包装)
    /// Error code, looking through context wrappers
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            AgentError::ToolNotFound(_) => ErrorCode::ToolNotFound,
            AgentError::ToolValidation { .. } => ErrorCode::ToolValidation,
            AgentError::ToolExecution { .. } => ErrorCode::ToolExecution,
            AgentError::ParserFailed(_) => ErrorCode::ParserFailed,
            AgentError::LlmCall { .. } => ErrorCode::LlmCall,
            AgentError::Timeout { .. } => ErrorCode::Timeout,
            AgentError::Cancelled => ErrorCode::Cancelled,
            AgentError::CycleDetected { .. } => ErrorCode::CycleDetected,
            AgentError::ExecutionUnsafe(_) => ErrorCode::ExecutionUnsafe,
            AgentError::NotFound(_) => ErrorCode::NotFound,
            AgentError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            AgentError::ExecutionFailed(_) => ErrorCode::ExecutionFailed,
            AgentError::Serialization(_) => ErrorCode::Serialization,
            AgentError::Io(_) => ErrorCode::Io,
            AgentError::Internal(_) => ErrorCode::Internal,
            AgentError::Contextual { inner, .. } => inner.code(),
        }
    }

    /// The innermost error, without context wrappers.
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::Contextual { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// 是否为可重试的瞬时错误
    /// Whether the failure is transient (rate limit, transport, deadline)
    pub fn is_transient(&self) -> bool {
        match self.root() {
            AgentError::LlmCall { transient, .. } => *transient,
            AgentError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code() == ErrorCode::Cancelled
    }

    /// 附加组件名
    /// Attach the component name
    pub fn with_component(self, component: impl Into<String>) -> Self {
        match self {
            AgentError::Contextual {
                inner,
                operation,
                context,
                ..
            } => AgentError::Contextual {
                inner,
                component: component.into(),
                operation,
                context,
            },
            other => AgentError::Contextual {
                inner: Box::new(other),
                component: component.into(),
                operation: String::new(),
                context: BTreeMap::new(),
            },
        }
    }

    /// 附加操作名
    /// Attach the operation name
    pub fn with_operation(self, operation: impl Into<String>) -> Self {
        match self {
            AgentError::Contextual {
                inner,
                component,
                context,
                ..
            } => AgentError::Contextual {
                inner,
                component,
                operation: operation.into(),
                context,
            },
            other => AgentError::Contextual {
                inner: Box::new(other),
                component: String::new(),
                operation: operation.into(),
                context: BTreeMap::new(),
            },
        }
    }

    /// 附加上下文键值
    /// Attach a key/value pair of context
    pub fn with_context(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let wrapped = match self {
            wrapped @ AgentError::Contextual { .. } => wrapped,
            other => AgentError::Contextual {
                inner: Box::new(other),
                component: String::new(),
                operation: String::new(),
                context: BTreeMap::new(),
            },
        };
        match wrapped {
            AgentError::Contextual {
                inner,
                component,
                operation,
                mut context,
            } => {
                context.insert(key.into(), value.to_string());
                AgentError::Contextual {
                    inner,
                    component,
                    operation,
                    context,
                }
            }
            other => other,
        }
    }

    /// 可序列化的错误快照
    /// Serialisable snapshot of this error
    pub fn to_info(&self) -> ErrorInfo {
        let (component, operation, context) = match self {
            AgentError::Contextual {
                component,
                operation,
                context,
                ..
            } => (
                non_empty(component),
                non_empty(operation),
                context.clone(),
            ),
            _ => (None, None, BTreeMap::new()),
        };
        ErrorInfo {
            code: self.code(),
            message: self.root().to_string(),
            component,
            operation,
            context,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// 错误信息快照 (存放在 AgentOutput 中)
/// Error snapshot stored in agent outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl From<&AgentError> for ErrorInfo {
    fn from(err: &AgentError) -> Self {
        err.to_info()
    }
}

impl From<ErrorInfo> for AgentError {
    fn from(info: ErrorInfo) -> Self {
        let mut err = AgentError::from_code(info.code, info.message);
        if let Some(component) = info.component {
            err = err.with_component(component);
        }
        if let Some(operation) = info.operation {
            err = err.with_operation(operation);
        }
        for (k, v) in info.context {
            err = err.with_context(k, v);
        }
        err
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
