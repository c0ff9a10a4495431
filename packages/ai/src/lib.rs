#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Safety assistant engine with LLM provider abstraction.
//!
//! Supports Anthropic Claude and `OpenAI` GPT via a common trait. The
//! engine composes a fixed public-safety system prompt (including canned
//! procedures for house fires, earthquakes, and basic first aid) with a
//! callable `find_place` tool backed by the places client, and wraps the
//! whole invocation in a reusable retry-with-backoff policy.

pub mod engine;
pub mod providers;
pub mod retry;

use thiserror::Error;

/// Errors that can occur during assistant operations.
#[derive(Debug, Error)]
pub enum AiError {
    /// HTTP request to the LLM provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider-specific error.
    #[error("Provider error: {message}")]
    Provider {
        /// Description of what went wrong.
        message: String,
    },

    /// Tool loop exceeded maximum iterations.
    #[error("Assistant loop exceeded maximum of {max_iterations} iterations")]
    MaxIterations {
        /// The configured maximum.
        max_iterations: u32,
    },

    /// Configuration error. Never retried.
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },
}

impl AiError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Configuration problems are permanent; everything else (transport,
    /// provider overload, malformed output) is worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }
}
