// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC wire types: one JSON request/response pair per method, plus the error
//! body that carries the taxonomy across the boundary.
//!
//! `client_id` on the wire is the serialized caller context of the
//! requesting operator.

use serde::{Deserialize, Serialize};

use rsmap_core::{CallerContext, Error};

use crate::acquire::{AcquireEntry, ReleaseEntry};

pub const TRY_INIT_PATH: &str = "/v1/init/try";
pub const COMPLETE_INIT_PATH: &str = "/v1/init/complete";
pub const FAIL_INIT_PATH: &str = "/v1/init/fail";
pub const ACQUIRE_PATH: &str = "/v1/acquire";
pub const ACQUIRE_MULTI_PATH: &str = "/v1/acquire_multi";
pub const RELEASE_PATH: &str = "/v1/release";
pub const RELEASE_MULTI_PATH: &str = "/v1/release_multi";
pub const STATUS_PATH: &str = "/v1/status";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TryInitRequest {
    pub resource: String,
    pub client_id: CallerContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TryInitResponse {
    pub should_try: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteInitRequest {
    pub resource: String,
    pub client_id: CallerContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailInitRequest {
    pub resource: String,
    pub client_id: CallerContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub resource: String,
    pub client_id: CallerContext,
    pub max: i64,
    pub exclusive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquireMultiRequest {
    pub entries: Vec<AcquireMultiEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquireMultiEntry {
    pub resource: String,
    pub context: CallerContext,
    pub max: i64,
    pub exclusive: bool,
}

impl From<AcquireMultiEntry> for AcquireEntry {
    fn from(entry: AcquireMultiEntry) -> Self {
        AcquireEntry {
            resource: entry.resource,
            context: entry.context,
            max: entry.max,
            exclusive: entry.exclusive,
        }
    }
}

impl From<&AcquireEntry> for AcquireMultiEntry {
    fn from(entry: &AcquireEntry) -> Self {
        AcquireMultiEntry {
            resource: entry.resource.clone(),
            context: entry.context.clone(),
            max: entry.max,
            exclusive: entry.exclusive,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub resource: String,
    pub client_id: CallerContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMultiRequest {
    pub entries: Vec<ReleaseMultiEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMultiEntry {
    pub resource: String,
    pub context: CallerContext,
}

impl From<ReleaseMultiEntry> for ReleaseEntry {
    fn from(entry: ReleaseMultiEntry) -> Self {
        ReleaseEntry {
            resource: entry.resource,
            context: entry.context,
        }
    }
}

impl From<&ReleaseEntry> for ReleaseMultiEntry {
    fn from(entry: &ReleaseEntry) -> Self {
        ReleaseMultiEntry {
            resource: entry.resource.clone(),
            context: entry.context.clone(),
        }
    }
}

/// Empty response of the mutating methods.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// Response of the status probe; also the election "is anyone there" ping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub addr: String,
    pub uptime_secs: u64,
}

/// Wire form of the error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Cancelled,
    Closing,
    InvalidOperation,
    NotFound,
    Storage,
    Transport,
    Config,
}

/// JSON body sent with non-success statuses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let (code, message) = match err {
            Error::Cancelled => (ErrorCode::Cancelled, err.to_string()),
            Error::Closing => (ErrorCode::Closing, err.to_string()),
            Error::InvalidOperation(msg) => (ErrorCode::InvalidOperation, msg.clone()),
            Error::NotFound(msg) => (ErrorCode::NotFound, msg.clone()),
            Error::Storage(msg) => (ErrorCode::Storage, msg.clone()),
            Error::Transport(msg) => (ErrorCode::Transport, msg.clone()),
            Error::Config(msg) => (ErrorCode::Config, msg.clone()),
        };
        ErrorBody { code, message }
    }
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        match body.code {
            ErrorCode::Cancelled => Error::Cancelled,
            ErrorCode::Closing => Error::Closing,
            ErrorCode::InvalidOperation => Error::InvalidOperation(body.message),
            ErrorCode::NotFound => Error::NotFound(body.message),
            ErrorCode::Storage => Error::Storage(body.message),
            ErrorCode::Transport => Error::Transport(body.message),
            ErrorCode::Config => Error::Config(body.message),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
