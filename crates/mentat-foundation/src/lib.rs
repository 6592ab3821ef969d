//! Mentat Foundation
//!
//! Engines built on the `mentat-kernel` contracts: callback dispatch, the
//! agent base and execution trace, tools, middleware, the reasoning engines
//! (ReAct, chain-of-thought, graph/skeleton/tree/program-of-thought,
//! self-ask), supervision, sequential chains and stream coordination.

// logging bootstrap
pub mod logging;

// callback dispatch
pub mod callbacks;

// agent base, execution trace, tools
pub mod agent;

// middleware chain and built-ins
pub mod middleware;

// ReAct engine
pub mod react;

// chain-of-thought engine
pub mod cot;

// GoT / SoT / ToT / PoT / Self-Ask engines
pub mod reasoning;

// supervisor with routing and aggregation
pub mod supervisor;

// sequential composition
pub mod chain;

// stream coordination
pub mod stream;

pub use callbacks::CallbackDispatcher;
pub use chain::{AgentChain, AgentChainBuilder, chain};
pub use cot::{CoTAgent, CoTAgentBuilder, CoTConfig};
pub use logging::{LogFormat, init_logging};
pub use react::{ReActAgent, ReActAgentBuilder, ReActConfig};
pub use reasoning::{
    GoTAgent, GoTConfig, PoTAgent, PoTConfig, SelfAskAgent, SelfAskConfig, SoTAgent, SoTConfig,
    ToTAgent, ToTConfig,
};
pub use supervisor::{
    AggregationStrategy, RoutingStrategy, SupervisorAgent, SupervisorAgentBuilder,
    SupervisorConfig,
};

/// Prelude 模块 - 常用类型导入
/// Prelude module - Common type imports
pub mod prelude {
    pub use crate::agent::tools::{FunctionTool, ToolRegistry, Toolbox, Toolkit};
    pub use crate::agent::{AgentBase, ExecutionScope};
    pub use crate::chain::{AgentChain, chain};
    pub use crate::cot::CoTAgent;
    pub use crate::middleware::{Middleware, MiddlewareChain};
    pub use crate::react::ReActAgent;
    pub use crate::reasoning::{GoTAgent, PoTAgent, SelfAskAgent, SoTAgent, ToTAgent};
    pub use crate::stream::{FanIn, Multiplexer, RateLimiter, StreamHandler, collect_stream};
    pub use crate::supervisor::{AggregationStrategy, RoutingStrategy, SupervisorAgent};
    pub use mentat_kernel::agent::prelude::*;
    pub use mentat_kernel::llm::{ChatMessage, CompletionRequest, CompletionResponse, LLMClient};
}
