//! 工具组件
//! Tool Component
//!
//! 定义统一的工具接口与描述符
//! Defines the unified tool interface and its descriptor

use crate::agent::context::AgentContext;
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::types::{ToolArgs, value_to_text};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 默认字符串参数长度上限 (1 MiB)
/// Default upper bound on string argument length (1 MiB)
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1024 * 1024;

/// 流式工具输出
/// Streaming tool output
pub type ToolStream = BoxStream<'static, AgentResult<Value>>;

/// 统一工具 Trait
/// Unified Tool Trait
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// use mentat_kernel::agent::components::tool::{Tool, ToolInput, ToolOutput};
///
/// struct Calculator;
///
/// #[async_trait]
/// impl Tool for Calculator {
///     fn name(&self) -> &str { "calculator" }
///     fn description(&self) -> &str { "Perform arithmetic operations" }
///     fn parameters_schema(&self) -> serde_json::Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": {
///                 "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] },
///                 "a": { "type": "number" },
///                 "b": { "type": "number" }
///             },
///             "required": ["operation", "a", "b"]
///         })
///     }
///
///     async fn invoke(&self, ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolOutput> {
///         // Implementation
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称 (唯一标识符)
    /// Tool name (unique identifier)
    fn name(&self) -> &str;

    /// 工具描述 (用于 LLM 理解)
    /// Tool description (for LLM understanding)
    fn description(&self) -> &str;

    /// 工具分类
    /// Tool category
    fn category(&self) -> &str {
        "general"
    }

    /// 参数 JSON Schema 子集
    /// Parameters schema (JSON-Schema subset: `type`, `properties`,
    /// `required`, `enum`, `minimum`, `maximum`, `default`)
    fn parameters_schema(&self) -> Value;

    fn requires_auth(&self) -> bool {
        false
    }

    /// 是否为危险操作
    /// Whether it is a dangerous operation
    fn is_dangerous(&self) -> bool {
        false
    }

    /// 字符串参数长度上限
    /// Upper bound on string argument length
    fn max_string_length(&self) -> usize {
        DEFAULT_MAX_STRING_LENGTH
    }

    /// 执行工具
    /// Execute tool
    async fn invoke(&self, ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolOutput>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// 流式执行
    /// Streaming execution
    async fn invoke_stream(&self, ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolStream> {
        let _ = (ctx, input);
        Err(AgentError::tool_execution(
            self.name(),
            "tool does not support streaming",
        ))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            category: self.category().to_string(),
            args_schema: self.parameters_schema(),
            requires_auth: self.requires_auth(),
            dangerous: self.is_dangerous(),
        }
    }
}

/// 工具描述符
/// Tool descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    pub args_schema: Value,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub dangerous: bool,
}

/// 工具输入
/// Tool Input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    /// 结构化参数
    /// Structured arguments
    pub args: ToolArgs,
    /// 调用方上下文
    /// Caller context
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl ToolInput {
    pub fn new(args: ToolArgs) -> Self {
        Self {
            args,
            context: HashMap::new(),
        }
    }

    /// 从任意 JSON 创建；非对象值包装为 `{"input": value}`
    /// Build from any JSON; non-objects become `{"input": value}`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => {
                let mut args = ToolArgs::new();
                args.insert("input".to_string(), other);
                Self::new(args)
            }
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// 获取字符串参数
    /// Get string parameter
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// 获取数字参数
    /// Get number parameter
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(|v| v.as_bool())
    }
}

impl From<Value> for ToolInput {
    fn from(v: Value) -> Self {
        Self::from_value(v)
    }
}

/// 工具执行结果
/// Tool execution output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    /// 创建成功结果
    /// Create success result
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            success: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// 创建失败结果
    /// Create failure result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            success: false,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 作为观察文本
    /// Render as observation text for a prompt
    pub fn to_observation(&self) -> String {
        if self.success {
            value_to_text(&self.result)
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("Unknown error"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"input": {"type": "string"}}})
        }
        async fn invoke(&self, _ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::success(input.get_str("input").unwrap_or_default()))
        }
    }

    #[test]
    fn test_descriptor_defaults() {
        let d = Echo.descriptor();
        assert_eq!(d.name, "echo");
        assert_eq!(d.category, "general");
        assert!(!d.dangerous);
        assert!(!d.requires_auth);
    }

    #[test]
    fn test_input_from_value() {
        let input = ToolInput::from_value(json!("hello"));
        assert_eq!(input.get_str("input"), Some("hello"));
        let input = ToolInput::from_value(json!({"a": 1.5}));
        assert_eq!(input.get_f64("a"), Some(1.5));
    }

    #[test]
    fn test_observation_rendering() {
        assert_eq!(ToolOutput::success(json!(10)).to_observation(), "10");
        assert_eq!(ToolOutput::success("ok").to_observation(), "ok");
        assert_eq!(ToolOutput::failure("boom").to_observation(), "Error: boom");
    }

    #[tokio::test]
    async fn test_streaming_unsupported_by_default() {
        let ctx = AgentContext::new();
        let res = Echo.invoke_stream(&ctx, ToolInput::default()).await;
        assert!(res.is_err());
    }
}
