// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator-owned database handle.
//!
//! The database file doubles as the election token: whoever holds the
//! exclusive file lock is the coordinator. The lock is taken before SQLite
//! ever opens the file and is held until the handle is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;
use rusqlite::Connection;
use thiserror::Error;

use crate::records::{now_nanos, ServerEvent, ServerLog, ServerRecord};
use rsmap_core::CallerContext;

/// Buckets, one table each.
pub(crate) const BUCKET_INIT: &str = "init";
pub(crate) const BUCKET_ACQUIRE: &str = "acquire";
const BUCKET_INFO: &str = "info";

/// Fixed key of the server record in the `info` bucket.
const SERVER_RECORD_KEY: &str = "server";

const LOCK_POLL: Duration = Duration::from_millis(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage errors; converted to the broker taxonomy at the controller
/// boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database; it is the coordinator.
    #[error("database locked by another process: {path:?}")]
    Locked { path: PathBuf },

    #[error("path exists as a directory: {path:?}")]
    PathIsDirectory { path: PathBuf },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for rsmap_core::Error {
    fn from(err: StoreError) -> Self {
        rsmap_core::Error::storage(err)
    }
}

/// Exclusive handle on the broker database.
pub struct Database {
    conn: Mutex<Connection>,
    // NOTE(lifetime): held to keep the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    path: PathBuf,
}

impl Database {
    /// Open the database, taking the exclusive file lock first.
    ///
    /// Retries the lock for up to `lock_timeout` before reporting
    /// [`StoreError::Locked`], which election treats as "someone else is the
    /// coordinator".
    pub fn open_exclusive(path: &Path, lock_timeout: Duration) -> Result<Self, StoreError> {
        if path.is_dir() {
            return Err(StoreError::PathIsDirectory {
                path: path.to_path_buf(),
            });
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let deadline = Instant::now() + lock_timeout;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL),
                Err(_) => {
                    return Err(StoreError::Locked {
                        path: path.to_path_buf(),
                    })
                }
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {BUCKET_INIT} (name TEXT PRIMARY KEY, record TEXT NOT NULL);\n\
             CREATE TABLE IF NOT EXISTS {BUCKET_ACQUIRE} (name TEXT PRIMARY KEY, record TEXT NOT NULL);\n\
             CREATE TABLE IF NOT EXISTS {BUCKET_INFO} (name TEXT PRIMARY KEY, record TEXT NOT NULL);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            lock_file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The coordinator launch/stop history, if any was recorded yet.
    pub fn server_record(&self) -> Result<Option<ServerRecord>, StoreError> {
        let conn = self.conn();
        read_record(&conn, BUCKET_INFO, SERVER_RECORD_KEY)
    }

    /// Append one entry to the coordinator history.
    pub fn append_server_log(
        &self,
        event: ServerEvent,
        addr: &str,
        context: &CallerContext,
    ) -> Result<(), StoreError> {
        let mut record = self.server_record()?.unwrap_or_default();
        record.logs.push(ServerLog {
            event,
            addr: addr.to_string(),
            context: context.clone(),
            ts: now_nanos(),
        });
        let json = serde_json::to_string(&record)?;
        let conn = self.conn();
        conn.execute(
            &format!("INSERT OR REPLACE INTO {BUCKET_INFO} (name, record) VALUES (?1, ?2)"),
            rusqlite::params![SERVER_RECORD_KEY, json],
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn read_record<R: serde::de::DeserializeOwned>(
    conn: &Connection,
    bucket: &str,
    name: &str,
) -> Result<Option<R>, StoreError> {
    use rusqlite::OptionalExtension;

    let json: Option<String> = conn
        .query_row(
            &format!("SELECT record FROM {bucket} WHERE name = ?1"),
            rusqlite::params![name],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
