//! Error types for the repository host and the task pipeline.

use thiserror::Error;

use crate::stages::{IllegalTransition, TaskState};

/// Failure talking to the repository host.
///
/// "Not found" is not an error: lookups return [`crate::host::Lookup::NotFound`].
#[derive(Debug, Error)]
pub enum HostError {
    /// Transport-level failure (connect, timeout, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The host answered with a status the operation does not accept.
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// A success response whose body is not the expected JSON.
    #[error("{operation} returned an unreadable body: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A write raced with another writer (stale or unexpected revision marker).
    #[error("conflicting write to {path}")]
    Conflict { path: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown repository: {0}")]
    UnknownRepository(String),
}

impl HostError {
    pub fn status(operation: &'static str, status: u16, body: &str) -> Self {
        Self::Status {
            operation,
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

/// Why a task run was abandoned.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage whose failure cannot be worked around.
    #[error("stage {stage} failed: {source}")]
    Fatal {
        stage: TaskState,
        #[source]
        source: HostError,
    },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}
