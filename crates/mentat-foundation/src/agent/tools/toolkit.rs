//! 工具集
//! Toolkit: a mutable, thread-safe set of tools

use mentat_kernel::agent::components::tool::{Tool, ToolDescriptor};
use parking_lot::RwLock;
use std::sync::Arc;

/// Tools in insertion order, unique by name
#[derive(Default)]
pub struct Toolkit {
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let kit = Self::new();
        for tool in tools {
            kit.add(tool);
        }
        kit
    }

    pub fn get_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().clone()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().iter().find(|t| t.name() == name).cloned()
    }

    pub fn get_names(&self) -> Vec<String> {
        self.tools
            .read()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.read().iter().map(|t| t.descriptor()).collect()
    }

    /// Add a tool, replacing any tool with the same name in place.
    pub fn add(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write();
        match tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => tools[i] = tool,
            None => tools.push(tool),
        }
    }

    /// Remove by name; returns whether a tool was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut tools = self.tools.write();
        let before = tools.len();
        tools.retain(|t| t.name() != name);
        tools.len() != before
    }

    /// 合并；名称冲突时以传入的工具为准
    /// Union with `other`; on a name collision the incoming tool wins
    pub fn merge(&self, other: &Toolkit) {
        for tool in other.get_tools() {
            self.add(tool);
        }
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("tools", &self.get_names())
            .finish()
    }
}
