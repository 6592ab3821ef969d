//! LLM 客户端契约
//! LLM client contract

pub mod client;
pub mod streaming;
pub mod types;

pub use client::*;
pub use streaming::*;
pub use types::*;
