//! 流式协调
//! Stream coordination
//!
//! Building blocks for moving chunk streams between producers and
//! consumers:
//!
//! - [`FanIn`]: bounded channel merging several producers, with an overall
//!   deadline
//! - [`Multiplexer`]: one producer broadcast to several bounded consumers,
//!   paced by the slowest
//! - [`RateLimiter`]: leaky-bucket pacing as a `Stream` adapter
//! - [`StreamHandler`] and [`process_stream`]: callback driven consumption
//! - [`collect_stream`]: drain a stream into a `Vec`
//!
//! Terminal and error chunks are recognised through [`StreamItem`].

pub mod buffer;
pub mod handler;
pub mod multiplexer;
pub mod rate_limit;

pub use buffer::FanIn;
pub use handler::{FnStreamHandler, StreamHandler, process_stream};
pub use multiplexer::Multiplexer;
pub use rate_limit::{RateLimitExt, RateLimiter};

use futures::{Stream, StreamExt};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::AgentStreamChunk;
use mentat_kernel::llm::streaming::StreamChunk;
use serde::{Deserialize, Serialize};
use std::pin::pin;
use std::time::Duration;

/// 流配置
/// Stream buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Items buffered before producers wait
    pub capacity: usize,
    /// Overall deadline for a buffered stream
    pub timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            timeout_ms: 30_000,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.capacity == 0 {
            return Err(AgentError::ConfigInvalid("stream: capacity must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(AgentError::ConfigInvalid("stream: timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 流元素
/// Chunk types that can mark the end of a stream or carry an error
pub trait StreamItem {
    /// Last chunk of the stream
    fn is_done(&self) -> bool {
        false
    }

    fn error(&self) -> Option<AgentError> {
        None
    }
}

impl StreamItem for StreamChunk {
    fn is_done(&self) -> bool {
        self.done
    }

    fn error(&self) -> Option<AgentError> {
        self.error.as_ref().map(|message| AgentError::llm(message.clone()))
    }
}

impl StreamItem for AgentStreamChunk {
    fn is_done(&self) -> bool {
        self.done
    }

    fn error(&self) -> Option<AgentError> {
        self.error.clone().map(AgentError::from)
    }
}

impl StreamItem for String {}

impl<T: StreamItem> StreamItem for AgentResult<T> {
    fn is_done(&self) -> bool {
        match self {
            Ok(item) => item.is_done(),
            Err(_) => true,
        }
    }

    fn error(&self) -> Option<AgentError> {
        match self {
            Ok(item) => item.error(),
            Err(e) => Some(e.clone()),
        }
    }
}

/// 收集流
/// Drain a stream up to and including its terminal chunk.
///
/// An error chunk stops collection and is returned as the error.
/// Cancellation and the context deadline are honoured between chunks.
pub async fn collect_stream<S>(ctx: &AgentContext, stream: S) -> AgentResult<Vec<S::Item>>
where
    S: Stream,
    S::Item: StreamItem,
{
    let mut stream = pin!(stream);
    let mut items = Vec::new();
    while let Some(item) = ctx.guard(async { Ok(stream.next().await) }).await? {
        if let Some(error) = item.error() {
            return Err(error);
        }
        let done = item.is_done();
        items.push(item);
        if done {
            break;
        }
    }
    Ok(items)
}
