//! 工具适配器
//! Tool adapters
//!
//! 提供便捷的工具创建方式
//! Convenient ways to create ad-hoc tools

use async_trait::async_trait;
use mentat_kernel::agent::components::tool::{Tool, ToolInput, ToolOutput};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::AgentResult;
use serde_json::Value;
use std::future::Future;

/// 函数工具
/// Function Tool
///
/// 从异步函数创建工具
/// Create a tool from an async function
///
/// # 示例
///
/// ```rust,ignore
/// let tool = FunctionTool::new(
///     "search",
///     "Look something up",
///     json!({
///         "type": "object",
///         "properties": { "query": { "type": "string" } },
///         "required": ["query"]
///     }),
///     |input| async move {
///         let q = input.get_str("query").unwrap_or_default().to_string();
///         Ok(ToolOutput::success(format!("results for {q}")))
///     },
/// );
/// ```
pub struct FunctionTool<F> {
    name: String,
    description: String,
    category: String,
    parameters_schema: Value,
    dangerous: bool,
    requires_auth: bool,
    handler: F,
}

impl<F, Fut> FunctionTool<F>
where
    F: Fn(ToolInput) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<ToolOutput>> + Send,
{
    /// 创建新的函数工具
    /// Create a new function tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: "general".to_string(),
            parameters_schema,
            dangerous: false,
            requires_auth: false,
            handler,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    pub fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FunctionTool<F>
where
    F: Fn(ToolInput) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<ToolOutput>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn parameters_schema(&self) -> Value {
        self.parameters_schema.clone()
    }

    fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    fn is_dangerous(&self) -> bool {
        self.dangerous
    }

    async fn invoke(&self, _ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolOutput> {
        (self.handler)(input).await
    }
}

/// 闭包工具
/// Closure Tool
///
/// 使用同步闭包创建简单工具
/// Create a simple tool from a synchronous closure
///
/// ```rust,ignore
/// let tool = ClosureTool::new("add", "Add two numbers", |input| {
///     let a = input.get_f64("a").unwrap_or(0.0);
///     let b = input.get_f64("b").unwrap_or(0.0);
///     Ok(ToolOutput::success(a + b))
/// });
/// ```
pub struct ClosureTool<F>
where
    F: Fn(ToolInput) -> AgentResult<ToolOutput> + Send + Sync,
{
    name: String,
    description: String,
    parameters_schema: Value,
    handler: F,
}

impl<F> ClosureTool<F>
where
    F: Fn(ToolInput) -> AgentResult<ToolOutput> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            handler,
        }
    }

    /// 设置参数 Schema
    /// Set parameters Schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameters_schema = schema;
        self
    }
}

#[async_trait]
impl<F> Tool for ClosureTool<F>
where
    F: Fn(ToolInput) -> AgentResult<ToolOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters_schema.clone()
    }

    async fn invoke(&self, _ctx: &AgentContext, input: ToolInput) -> AgentResult<ToolOutput> {
        (self.handler)(input)
    }
}
