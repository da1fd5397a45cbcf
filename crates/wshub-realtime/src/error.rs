//! Registry error taxonomy.
//!
//! None of these are fatal to the process. Registry operations log them at
//! the point of failure and surface them as `Option`/`bool`/`Result` values.

use thiserror::Error;

use wshub_core::error::{AppError, ErrorKind};

use crate::registry::ServerState;
use crate::transport::TransportError;

/// Errors reported by registry, broadcast, and sweep operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is not in the `Started` state.
    #[error("the registry is not started (current state: {0})")]
    NotStarted(ServerState),

    /// No session is registered under the given id.
    #[error("session not found: '{0}'")]
    SessionNotFound(String),

    /// The payload failed validation before any network call.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The transport failed while sending.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// No data could be read from a source stream.
    #[error("no data could be read from the stream")]
    EmptyRead,

    /// Fewer bytes than requested were read from a source stream.
    #[error("only {read} of {requested} byte(s) could be read from the stream")]
    PartialRead {
        /// Bytes actually read.
        read: usize,
        /// Bytes requested.
        requested: usize,
    },

    /// Reading a source stream failed.
    #[error("stream read failed: {0}")]
    Stream(#[from] std::io::Error),
}

impl RegistryError {
    /// Create an invalid-payload error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let kind = match &err {
            RegistryError::NotStarted(_) => ErrorKind::ServiceUnavailable,
            RegistryError::SessionNotFound(_) => ErrorKind::NotFound,
            RegistryError::InvalidPayload(_) => ErrorKind::Validation,
            RegistryError::Transport(_) => ErrorKind::Session,
            RegistryError::EmptyRead
            | RegistryError::PartialRead { .. }
            | RegistryError::Stream(_) => ErrorKind::Io,
        };
        let message = err.to_string();
        AppError::with_source(kind, message, err)
    }
}
