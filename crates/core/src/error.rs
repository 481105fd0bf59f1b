// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every layer of the broker.
//!
//! The kinds below cross the RPC boundary unchanged: the server maps them to
//! wire codes and the client reconstructs the same kind on its side.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by broker operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The caller cancelled the operation or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// The coordinator is shutting down; do not retry against it.
    #[error("coordinator is closing")]
    Closing,

    /// An operation that requires holding a lock was issued by a non-holder.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// No record exists for the named resource.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The key/value store failed; fatal to the operation.
    #[error("storage: {0}")]
    Storage(String),

    /// An RPC could not be delivered; retried by the client policy.
    #[error("transport: {0}")]
    Transport(String),

    /// Invalid directory layout or options.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Error::NotFound(resource.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Error::Storage(msg.to_string())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Error::Transport(msg.to_string())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for errors that the client-side retry policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
