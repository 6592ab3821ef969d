//! Provider-agnostic streaming types

use crate::usage::TokenUsage;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Streaming chunk
///
/// `content_so_far` accumulates every delta seen on the stream, so the
/// last chunk alone is enough to recover the full text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub content_so_far: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// Text chunk continuing `previous`.
    pub fn text(previous: &str, delta: impl Into<String>) -> Self {
        let delta = delta.into();
        Self {
            content_so_far: format!("{previous}{delta}"),
            delta,
            ..Default::default()
        }
    }

    pub fn done(content: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            delta: String::new(),
            content_so_far: content.into(),
            done: true,
            usage,
            error: None,
        }
    }

    pub fn failed(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            content_so_far: content.into(),
            done: true,
            usage: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Type erased chunk stream
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Type erased plain token stream
pub type BoxTokenStream = BoxStream<'static, String>;
