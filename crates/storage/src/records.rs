// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted record types.
//!
//! Event enums serialize as fixed integer values; changing them would break
//! every database already on disk. Timestamps are signed 64-bit nanoseconds
//! since the Unix epoch.

use rsmap_core::CallerContext;
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in nanoseconds for a new log entry.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Init lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum InitEvent {
    Started = 1,
    Completed = 2,
    Failed = 3,
}

impl From<InitEvent> for i64 {
    fn from(event: InitEvent) -> i64 {
        event as i64
    }
}

impl TryFrom<i64> for InitEvent {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(InitEvent::Started),
            2 => Ok(InitEvent::Completed),
            3 => Ok(InitEvent::Failed),
            other => Err(format!("unknown init event: {other}")),
        }
    }
}

/// One entry of an init record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitLog {
    pub event: InitEvent,
    pub context: CallerContext,
    pub ts: i64,
}

/// Append-only init history of one resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRecord {
    pub logs: Vec<InitLog>,
}

impl InitRecord {
    pub fn last(&self) -> Option<&InitLog> {
        self.logs.last()
    }
}

/// Acquisition lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum AcquireEvent {
    Acquiring = 1,
    Acquired = 2,
    Released = 3,
}

impl From<AcquireEvent> for i64 {
    fn from(event: AcquireEvent) -> i64 {
        event as i64
    }
}

impl TryFrom<i64> for AcquireEvent {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AcquireEvent::Acquiring),
            2 => Ok(AcquireEvent::Acquired),
            3 => Ok(AcquireEvent::Released),
            other => Err(format!("unknown acquisition event: {other}")),
        }
    }
}

/// One entry of an acquisition record. `n` is the granted weight on
/// `Acquired` entries and 0 otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireLog {
    pub event: AcquireEvent,
    #[serde(default)]
    pub n: i64,
    pub context: CallerContext,
    pub ts: i64,
}

/// Append-only acquisition history of one resource. `max` is fixed when the
/// record is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireRecord {
    pub max: i64,
    pub logs: Vec<AcquireLog>,
}

/// Coordinator lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ServerEvent {
    Launched = 1,
    Stopped = 2,
}

impl From<ServerEvent> for i64 {
    fn from(event: ServerEvent) -> i64 {
        event as i64
    }
}

impl TryFrom<i64> for ServerEvent {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ServerEvent::Launched),
            2 => Ok(ServerEvent::Stopped),
            other => Err(format!("unknown server event: {other}")),
        }
    }
}

/// One entry of the coordinator history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLog {
    pub event: ServerEvent,
    pub addr: String,
    pub context: CallerContext,
    pub ts: i64,
}

/// Coordinator launch/stop history for one broker directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub logs: Vec<ServerLog>,
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
