//! 工具注册中心
//! Tool registry
//!
//! 进程级的工具注册中心。在启动时创建一次，并显式传递给需要它的组件。
//! Process-wide tool registry. Create it once at startup and hand it to the
//! components that need it; there is no global instance.

use super::toolkit::Toolkit;
use mentat_kernel::agent::components::tool::{Tool, ToolDescriptor};
use mentat_kernel::agent::error::{AgentError, AgentResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 工具注册中心
/// Tool registry
///
/// # 示例
///
/// ```rust,ignore
/// let registry = Arc::new(ToolRegistry::new());
/// registry.register(Arc::new(Calculator))?;
///
/// for tool in registry.list() {
///     info!("{}: {}", tool.name, tool.description);
/// }
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；名称重复时失败
    /// Register a tool; fails when the name is taken
    pub fn register(&self, tool: Arc<dyn Tool>) -> AgentResult<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(AgentError::ConfigInvalid("tool name must not be empty".into()));
        }
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(AgentError::AlreadyExists(format!("tool '{name}'")));
        }
        tracing::debug!(tool = %name, category = tool.category(), "tool registered");
        tools.insert(name, tool);
        Ok(())
    }

    /// 注销工具；不存在时失败
    /// Unregister a tool; fails when absent
    pub fn unregister(&self, name: &str) -> AgentResult<Arc<dyn Tool>> {
        self.tools
            .write()
            .remove(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// 所有工具的描述符，按名称排序
    /// Descriptors of every tool, sorted by name
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> =
            self.tools.read().values().map(|t| t.descriptor()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// 用指定名称的工具创建工具集；遇到第一个未知名称即失败
    /// Build a toolkit from the named tools; fails on the first unknown name
    pub fn create_toolkit<S: AsRef<str>>(&self, names: &[S]) -> AgentResult<Toolkit> {
        let tools = self.tools.read();
        let toolkit = Toolkit::new();
        for name in names {
            let name = name.as_ref();
            let tool = tools
                .get(name)
                .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
            toolkit.add(tool.clone());
        }
        Ok(toolkit)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
