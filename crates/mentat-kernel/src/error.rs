//! Crate-level error types for `mentat-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from every
//! sub-module (agent, config, IO, serialization) together with
//! [`error_stack::Report`] for context-carrying error propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mentat_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_prompt() -> KernelResult<String> {
//!     std::fs::read_to_string("prompt.txt")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading prompt.txt")
//! }
//! ```

use crate::agent::error::AgentError;
use thiserror::Error;

/// Crate-level error type for `mentat-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An error originating from the agent sub-system.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

impl From<KernelError> for AgentError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Agent(e) => e,
            KernelError::Io(e) => AgentError::Io(e.to_string()),
            KernelError::Serialization(e) => AgentError::Serialization(e.to_string()),
            other => AgentError::ConfigInvalid(other.to_string()),
        }
    }
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
