//! Error taxonomy shared by discovery, peer calls and dispatch

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Unreachable or malformed manifest. Excludes that one target only.
    #[error("Discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },

    /// No resolvable endpoint for a named peer.
    #[error("No HTTP endpoint for agent {0}")]
    Connection(String),

    /// No matching capability, locally or on a peer.
    #[error("{0}")]
    Invocation(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Failure surfaced from the execution engine or a capability handler.
    #[error("Execution failed: {0}")]
    Executor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type MeshResult<T> = Result<T, MeshError>;

impl MeshError {
    pub fn executor(err: impl std::fmt::Display) -> Self {
        Self::Executor(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
