//! 高级推理模式
//! Structured reasoning engines
//!
//! - **GoT**: 思维图, thoughts as a DAG executed in dependency waves
//! - **SoT**: 思维骨架, an outline whose points are elaborated in parallel
//! - **Self-Ask**: 自问自答, recursive follow-up questions
//! - **PoT**: 程序思维, generated programs run in a subprocess
//! - **ToT**: 思维树, beam / depth-first / breadth-first search over thoughts
//!
//! Each engine implements [`Agent`](mentat_kernel::agent::core::Agent) and
//! is built through its `builder()`.

pub mod got;
pub mod heuristics;
pub mod pot;
pub mod self_ask;
pub mod sot;
pub mod tot;

pub use got::{GoTAgent, GoTAgentBuilder, GoTConfig, MergeStrategy, ThoughtEvaluation, ThoughtGraph};
pub use heuristics::{Heuristics, LanguageKeywords};
pub use pot::{CodeExecutor, CodeLanguage, ExecutionOutput, PoTAgent, PoTAgentBuilder, PoTConfig, ProcessExecutor};
pub use self_ask::{QuestionStrategy, SelfAskAgent, SelfAskAgentBuilder, SelfAskConfig};
pub use sot::{SkeletonAggregation, SoTAgent, SoTAgentBuilder, SoTConfig};
pub use tot::{EvaluationMethod, SearchStrategy, ToTAgent, ToTAgentBuilder, ToTConfig};
