//! 工具系统 (Foundation 层)
//! Tool System (Foundation Layer)
//!
//! Kernel 仅定义 Tool 接口与基础类型；注册中心、工具箱与执行器放在 Foundation 层。
//! Kernel only defines the Tool interface and base types; the registry,
//! toolbox and executors live here.

pub mod adapters;
pub mod parallel;
pub mod registry;
pub mod toolbox;
pub mod toolkit;
pub mod validator;

pub use adapters::{ClosureTool, FunctionTool};
pub use parallel::{ExecutionMode, ParallelExecutor, ParallelOutcome};
pub use registry::ToolRegistry;
pub use toolbox::{ToolCall, ToolExecutionResult, ToolHistoryEntry, ToolStatistics, Toolbox};
pub use toolkit::Toolkit;
pub use validator::{apply_defaults, validate_args};
