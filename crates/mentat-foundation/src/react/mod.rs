//! ReAct (Reasoning + Acting) Agent 框架
//! ReAct (Reasoning + Acting) Agent Framework
//!
//! - **思考-行动-观察循环**: 标准 ReAct 推理模式
//! - **Thought-Action-Observation loop**: Standard ReAct reasoning pattern
//! - **工具调用**: 通过 Toolbox 校验并执行工具
//! - **Tool calling**: Tools are validated and executed through the Toolbox
//!
//! # 架构
//! # Architecture
//!
//! ```text
//! START → THINK → (ACT → OBSERVE → THINK)* → FINAL_ANSWER | EXHAUSTED
//! ```
//!
//! Exhausting `max_steps` without a final answer yields a `partial`
//! output whose result is the last thought.
//!
//! # 示例
//! # Examples
//!
//! ```rust,ignore
//! use mentat_foundation::react::ReActAgent;
//!
//! let agent = ReActAgent::builder()
//!     .with_llm(llm)
//!     .with_tool(Arc::new(calculator))
//!     .with_max_steps(5)
//!     .build()?;
//!
//! let output = agent.invoke(&ctx, AgentInput::new("What is (15-5+8)/2?")).await?;
//! info!("Answer: {}", output.result_text());
//! ```

mod core;
pub mod parser;

pub use core::*;
pub use parser::{ReActTurn, TurnKind, parse_response};
