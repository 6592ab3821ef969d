//! 思维链 (Chain-of-Thought) 推理
//! Chain-of-Thought reasoning
//!
//! A single model call prompted zero-shot ("Let's think step by step") or
//! with worked examples. The response is split into semantic steps by
//! [`StepParser`]: one step per `Step N` header, not one per line.

mod core;
pub mod parser;

pub use core::{CoTAgent, CoTAgentBuilder, CoTConfig, FewShotExample, USE_TOOL_MARKER};
pub use parser::{DEFAULT_FINAL_ANSWER_FORMAT, ParsedChain, StepParser, render_chain};
