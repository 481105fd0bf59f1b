// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator election over a shared directory.
//!
//! Workers targeting the same directory race to take the database file's
//! exclusive lock. The winner loads the persisted records, serves the RPC
//! surface and publishes its address; everyone else reads the address file
//! and talks to the winner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rsmap_core::{CallerContext, Error, Result};
use rsmap_storage::{Database, ServerEvent, StoreError};

use crate::map::ServerSideMap;
use crate::server::{serve, AppState};

/// Overrides the directory grouping, so a run script can point sibling
/// processes at one coordinator even when their parent pids differ.
pub const EXECUTION_ID_ENV: &str = "RSMAP_EXECUTION_ID";

const DB_FILE: &str = "logs.db";
const ADDR_FILE: &str = "addr";

/// The grouping key under the broker directory: the `RSMAP_EXECUTION_ID`
/// environment variable when set, else the textual parent process id.
pub fn execution_id() -> String {
    if let Ok(id) = std::env::var(EXECUTION_ID_ENV) {
        if !id.is_empty() {
            return id;
        }
    }
    parent_process_id().to_string()
}

#[cfg(unix)]
fn parent_process_id() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn parent_process_id() -> u32 {
    std::process::id()
}

/// Resolved file layout of one broker directory:
/// `<base>/<execution_id>/{logs.db, addr}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapDirs {
    pub root: PathBuf,
    pub db_file: PathBuf,
    pub addr_file: PathBuf,
}

impl MapDirs {
    /// Create the directory for the current execution id and resolve the
    /// file paths. Fails when a file path is occupied by a directory.
    pub fn prepare(base: &Path) -> Result<Self> {
        let root = base.join(execution_id());
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::config(format!("create broker directory {root:?}: {e}")))?;

        let db_file = root.join(DB_FILE);
        let addr_file = root.join(ADDR_FILE);
        for path in [&db_file, &addr_file] {
            if path.is_dir() {
                return Err(Error::config(format!(
                    "broker path {path:?} exists as a directory"
                )));
            }
        }
        Ok(Self {
            root,
            db_file,
            addr_file,
        })
    }

    /// The published coordinator address, if any.
    pub fn read_addr(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.addr_file).ok()?;
        let addr = text.trim();
        if addr.is_empty() {
            None
        } else {
            Some(addr.to_string())
        }
    }

    /// Publish `addr` atomically: write a temporary file, then rename it
    /// over the address file.
    pub fn publish_addr(&self, addr: &str) -> Result<()> {
        let tmp = self.root.join(format!("{ADDR_FILE}.tmp"));
        std::fs::write(&tmp, format!("{addr}\n"))
            .map_err(|e| Error::storage(format!("write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &self.addr_file)
            .map_err(|e| Error::storage(format!("publish {:?}: {e}", self.addr_file)))?;
        Ok(())
    }
}

/// Election tunables; the facade fills these from its options.
#[derive(Clone, Debug)]
pub struct ElectionConfig {
    /// How long replayed acquirers keep precedence over fresh ones.
    pub queue_grace: Duration,
    /// How long to wait for the database file lock before conceding.
    pub lock_timeout: Duration,
    /// Ceiling on graceful HTTP shutdown at close time.
    pub shutdown_deadline: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            queue_grace: Duration::from_secs(10),
            lock_timeout: Duration::from_millis(150),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}

/// Per-directory election mutex: within one process only one election
/// attempt runs for a given directory at a time.
pub fn dir_lock(root: &Path) -> Arc<tokio::sync::Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        locks
            .entry(root.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    )
}

/// A won election: the database, the live server and its shutdown handle.
pub struct Coordinator {
    db: Arc<Database>,
    map: Arc<ServerSideMap>,
    addr: String,
    context: CallerContext,
    closing: CancellationToken,
    server: JoinHandle<()>,
    shutdown_deadline: Duration,
}

impl Coordinator {
    pub fn map(&self) -> Arc<ServerSideMap> {
        Arc::clone(&self.map)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Token observed by every blocking operation; cancelled at shutdown.
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Stop the coordinator: fail in-flight waits with CLOSING, drain the
    /// HTTP server under the deadline, append STOPPED, close the database.
    pub async fn shutdown(self) {
        self.closing.cancel();
        if tokio::time::timeout(self.shutdown_deadline, self.server)
            .await
            .is_err()
        {
            warn!(addr = %self.addr, "coordinator server did not drain in time");
        }
        if let Err(err) = self
            .db
            .append_server_log(ServerEvent::Stopped, &self.addr, &self.context)
        {
            warn!(error = %err, "failed to record coordinator stop");
        }
        info!(addr = %self.addr, "coordinator stopped");
        // Dropping `db` closes the store and releases the file lock.
    }
}

/// Attempt to become the coordinator for `dirs`.
///
/// Returns `Ok(None)` when another process already owns the database. On a
/// win: the records are replayed, the server is bound on an ephemeral local
/// port and running before the address is published, and LAUNCHED is
/// appended last.
pub async fn try_become_coordinator(
    dirs: &MapDirs,
    context: &CallerContext,
    config: &ElectionConfig,
) -> Result<Option<Coordinator>> {
    let db = match Database::open_exclusive(&dirs.db_file, config.lock_timeout) {
        Ok(db) => Arc::new(db),
        Err(StoreError::Locked { .. }) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let closing = CancellationToken::new();
    let map = Arc::new(ServerSideMap::load(Arc::clone(&db), config.queue_grace, closing.clone()).await?);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| Error::transport(format!("bind coordinator listener: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::transport(format!("local addr: {e}")))?
        .port();
    let addr = format!("http://127.0.0.1:{port}");

    let server = {
        let state = AppState::new(Arc::clone(&map), addr.clone());
        let shutdown = closing.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            if let Err(err) = serve(listener, state, shutdown).await {
                warn!(addr = %addr, error = %err, "coordinator server exited with error");
            }
        })
    };

    dirs.publish_addr(&addr)?;
    db.append_server_log(ServerEvent::Launched, &addr, context)?;
    info!(addr = %addr, root = ?dirs.root, "coordinator launched");

    Ok(Some(Coordinator {
        db,
        map,
        addr,
        context: context.clone(),
        closing,
        server,
        shutdown_deadline: config.shutdown_deadline,
    }))
}

#[cfg(test)]
#[path = "election_tests.rs"]
mod tests;
