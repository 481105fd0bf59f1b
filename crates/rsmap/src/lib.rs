// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rsmap: a cross-process broker for scarce test resources.
//!
//! Worker processes that share a directory elect one coordinator among
//! themselves; everyone else forwards over HTTP. A [`Map`] initializes each
//! named resource exactly once across all workers and hands out
//! reader/writer locks with a configurable cap on parallel holders.
//!
//! ```no_run
//! use rsmap::{Map, ResourceOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), rsmap::MapError> {
//! let map = Map::new(".rsmap").await?;
//! let cancel = CancellationToken::new();
//! let db = map
//!     .resource(&cancel, "db", ResourceOptions::new().with_init(|| async {
//!         // start containers, load fixtures ...
//!         Ok(())
//!     }))
//!     .await?;
//!
//! db.rlock(&cancel).await?;
//! // run tests against the shared database
//! db.unlock_any().await?;
//! map.close().await;
//! # Ok(())
//! # }
//! ```

mod client;

use std::future::Future;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rsmap_daemon::{
    dir_lock, try_become_coordinator, AcquireEntry, Coordinator, ElectionConfig, MapDirs,
    ReleaseEntry, ResourceMap,
};

pub use client::RetryPolicy;
pub use rsmap_core::{CallerContext, Error, Frame};
pub use rsmap_daemon::EXECUTION_ID_ENV;

use client::ClientSideMap;

/// Errors surfaced by the facade: broker errors plus failed user
/// initializers.
#[derive(Debug, ThisError)]
pub enum MapError {
    #[error(transparent)]
    Broker(#[from] Error),

    #[error("resource initialization failed: {0}")]
    Init(Box<dyn std::error::Error + Send + Sync>),
}

/// Error type returned by resource initializers.
pub type InitError = Box<dyn std::error::Error + Send + Sync>;

type InitFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), InitError>> + Send>;

/// Map construction options.
#[derive(Clone, Debug)]
pub struct MapOptions {
    retry: RetryPolicy,
    queue_grace: Duration,
    lock_timeout: Duration,
    shutdown_deadline: Duration,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            queue_grace: Duration::from_secs(10),
            lock_timeout: Duration::from_millis(150),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry policy for client-side RPCs and election attempts.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How long replayed acquirers keep precedence after a coordinator
    /// restart.
    pub fn with_queue_grace(mut self, grace: Duration) -> Self {
        self.queue_grace = grace;
        self
    }

    /// How long an election attempt waits for the database file lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Ceiling on graceful coordinator shutdown.
    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }
}

/// Per-resource options for [`Map::resource`].
pub struct ResourceOptions {
    max_parallelism: i64,
    init: Option<InitFn>,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 5,
            init: None,
        }
    }
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on concurrent shared holders; an exclusive lock takes the whole
    /// cap. Defaults to 5.
    pub fn with_max_parallelism(mut self, n: i64) -> Self {
        self.max_parallelism = n;
        self
    }

    /// One-time initializer, run by whichever worker first declares the
    /// resource. Other workers wait for its completion; a failure lets the
    /// next declaring worker retry.
    pub fn with_init<F, Fut>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), InitError>> + Send + 'static,
    {
        self.init = Some(Box::new(move || Box::pin(init())));
        self
    }
}

struct MapInner {
    ctx: CallerContext,
    dirs: MapDirs,
    options: MapOptions,
    http: reqwest::Client,
    transport: RwLock<Arc<dyn ResourceMap>>,
    coordinator: tokio::sync::Mutex<Option<Coordinator>>,
    stop: CancellationToken,
    election: Mutex<Option<JoinHandle<()>>>,
}

impl MapInner {
    fn current_transport(&self) -> Result<Arc<dyn ResourceMap>, Error> {
        if self.stop.is_cancelled() {
            return Err(Error::Closing);
        }
        Ok(Arc::clone(
            &self.transport.read().unwrap_or_else(|e| e.into_inner()),
        ))
    }
}

/// The broker handle shared by one worker process.
///
/// Calls go through the current transport: over HTTP while another process
/// coordinates, directly in-process once this map wins the election.
#[derive(Clone)]
pub struct Map {
    inner: Arc<MapInner>,
}

impl Map {
    /// Open (or join) the broker rooted at `dir`.
    ///
    /// Every worker of one run must pass the same directory; records and
    /// the coordinator address live under `<dir>/<execution id>/`.
    #[track_caller]
    pub fn new(dir: impl AsRef<Path>) -> impl Future<Output = Result<Map, MapError>> {
        Self::with_options(dir, MapOptions::default())
    }

    /// [`Map::new`] with explicit options.
    #[track_caller]
    pub fn with_options(
        dir: impl AsRef<Path>,
        options: MapOptions,
    ) -> impl Future<Output = Result<Map, MapError>> {
        let ctx = CallerContext::new().append(Location::caller());
        let dir: PathBuf = dir.as_ref().to_path_buf();
        async move {
            let dirs = MapDirs::prepare(&dir)?;
            let http = reqwest::Client::new();
            let client = ClientSideMap::new(dirs.clone(), http.clone(), options.retry.clone());
            let inner = Arc::new(MapInner {
                ctx,
                dirs,
                options,
                http,
                transport: RwLock::new(Arc::new(client) as Arc<dyn ResourceMap>),
                coordinator: tokio::sync::Mutex::new(None),
                stop: CancellationToken::new(),
                election: Mutex::new(None),
            });

            let handle = tokio::spawn(run_election(Arc::clone(&inner)));
            *inner.election.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

            Ok(Map { inner })
        }
    }

    /// Declare the named resource, initializing it exactly once across all
    /// workers of the run.
    ///
    /// When this caller wins the init slot, the registered initializer runs
    /// here: success records the resource as initialized; an error (or
    /// panic) records the failure so another worker can retry, and is
    /// propagated unchanged.
    #[track_caller]
    pub fn resource<'a>(
        &'a self,
        cancel: &CancellationToken,
        name: &str,
        options: ResourceOptions,
    ) -> impl Future<Output = Result<Resource, MapError>> + 'a {
        let ctx = self.inner.ctx.append(Location::caller());
        let cancel = cancel.clone();
        let name = name.to_string();
        async move { self.declare(ctx, cancel, name, options).await }
    }

    async fn declare(
        &self,
        ctx: CallerContext,
        cancel: CancellationToken,
        name: String,
        options: ResourceOptions,
    ) -> Result<Resource, MapError> {
        let transport = self.inner.current_transport()?;
        let should_try = transport.try_init(&name, &ctx, &cancel).await?;
        if should_try {
            match options.init {
                Some(init) => match tokio::spawn(init()).await {
                    Ok(Ok(())) => transport.complete_init(&name, &ctx).await?,
                    Ok(Err(err)) => {
                        if let Err(fail_err) = transport.fail_init(&name, &ctx).await {
                            warn!(resource = %name, error = %fail_err, "failed to record init failure");
                        }
                        return Err(MapError::Init(err));
                    }
                    Err(join_err) => {
                        if let Err(fail_err) = transport.fail_init(&name, &ctx).await {
                            warn!(resource = %name, error = %fail_err, "failed to record init failure");
                        }
                        match join_err.try_into_panic() {
                            Ok(panic) => std::panic::resume_unwind(panic),
                            Err(_) => return Err(MapError::Broker(Error::Cancelled)),
                        }
                    }
                },
                // No initializer registered: the slot is won and there is
                // nothing to run, so the resource counts as initialized.
                None => transport.complete_init(&name, &ctx).await?,
            }
        }

        Ok(Resource {
            map: Arc::downgrade(&self.inner),
            name,
            max: options.max_parallelism,
            ctx,
        })
    }

    /// Stop this map: end the election loop and, when this process is the
    /// coordinator, shut the coordinator down.
    pub async fn close(&self) {
        self.inner.stop.cancel();
        let handle = self
            .inner
            .election
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Some(coordinator) = self.inner.coordinator.lock().await.take() {
            coordinator.shutdown().await;
        }
    }
}

async fn run_election(inner: Arc<MapInner>) {
    let config = ElectionConfig {
        queue_grace: inner.options.queue_grace,
        lock_timeout: inner.options.lock_timeout,
        shutdown_deadline: inner.options.shutdown_deadline,
    };

    loop {
        if inner.stop.is_cancelled() {
            return;
        }

        let won = {
            let lock = dir_lock(&inner.dirs.root);
            let _guard = lock.lock().await;

            if let Some(addr) = inner.dirs.read_addr() {
                if client::ping(&inner.http, &addr).await {
                    debug!(addr = %addr, "joined existing coordinator");
                    return;
                }
            }

            match try_become_coordinator(&inner.dirs, &inner.ctx, &config).await {
                Ok(Some(coordinator)) => Some(coordinator),
                Ok(None) => None,
                Err(err) => {
                    warn!(error = %err, "election attempt failed");
                    None
                }
            }
        };

        if let Some(coordinator) = won {
            let map: Arc<dyn ResourceMap> = coordinator.map();
            *inner.transport.write().unwrap_or_else(|e| e.into_inner()) = map;
            *inner.coordinator.lock().await = Some(coordinator);
            info!("this process is the coordinator");
            return;
        }

        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = tokio::time::sleep(inner.options.retry.interval) => {}
        }
    }
}

/// Lock surface for one named resource.
///
/// Acquire and release are idempotent per `Resource` instance: locking an
/// already-held resource is a no-op, as is releasing one that is not held.
pub struct Resource {
    map: Weak<MapInner>,
    name: String,
    max: i64,
    ctx: CallerContext,
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the exclusive lock.
    pub async fn lock(&self, cancel: &CancellationToken) -> Result<(), MapError> {
        self.acquire(cancel, true).await
    }

    /// Acquire a shared slot.
    pub async fn rlock(&self, cancel: &CancellationToken) -> Result<(), MapError> {
        self.acquire(cancel, false).await
    }

    async fn acquire(&self, cancel: &CancellationToken, exclusive: bool) -> Result<(), MapError> {
        let inner = self.upgrade()?;
        let transport = inner.current_transport()?;
        transport
            .acquire(&self.name, &self.ctx, self.max, exclusive, cancel)
            .await?;
        Ok(())
    }

    /// Release whatever this resource holds; succeeds when nothing is held.
    pub async fn unlock_any(&self) -> Result<(), MapError> {
        let inner = self.upgrade()?;
        let transport = inner.current_transport()?;
        transport.release(&self.name, &self.ctx).await?;
        Ok(())
    }

    /// A locker acquiring this resource exclusively, for
    /// [`lock_resources`].
    pub fn exclusive(&self) -> Locker {
        self.locker(true)
    }

    /// A locker acquiring a shared slot of this resource, for
    /// [`lock_resources`].
    pub fn shared(&self) -> Locker {
        self.locker(false)
    }

    fn locker(&self, exclusive: bool) -> Locker {
        Locker {
            map: self.map.clone(),
            entry: AcquireEntry {
                resource: self.name.clone(),
                context: self.ctx.clone(),
                max: self.max,
                exclusive,
            },
        }
    }

    fn upgrade(&self) -> Result<Arc<MapInner>, Error> {
        self.map.upgrade().ok_or(Error::Closing)
    }
}

/// One entry of a multi-resource acquisition.
pub struct Locker {
    map: Weak<MapInner>,
    entry: AcquireEntry,
}

/// Held multi-resource locks; release them together with
/// [`Locked::release`].
pub struct Locked {
    map: Weak<MapInner>,
    entries: Vec<AcquireEntry>,
}

impl Locked {
    /// Release every lock taken by the originating [`lock_resources`] call.
    pub async fn release(self) -> Result<(), MapError> {
        let inner = self.map.upgrade().ok_or(Error::Closing)?;
        let transport = inner.current_transport()?;
        let entries: Vec<ReleaseEntry> = self
            .entries
            .iter()
            .map(|entry| ReleaseEntry {
                resource: entry.resource.clone(),
                context: entry.context.clone(),
            })
            .collect();
        transport.release_multi(&entries).await?;
        Ok(())
    }
}

/// Acquire several resources at once, without deadlocking against other
/// multi-resource acquisitions of the same map.
///
/// All lockers must derive from the same [`Map`]. On partial failure,
/// entries that already acquired stay held until released or until the
/// coordinator shuts down.
pub async fn lock_resources(
    cancel: &CancellationToken,
    lockers: Vec<Locker>,
) -> Result<Locked, MapError> {
    let Some(first) = lockers.first() else {
        return Err(Error::config("lock_resources: no lockers given").into());
    };
    let inner = first.map.upgrade().ok_or(Error::Closing)?;
    if !lockers.iter().all(|l| Weak::ptr_eq(&l.map, &first.map)) {
        return Err(Error::config("lock_resources: lockers derive from different maps").into());
    }

    let entries: Vec<AcquireEntry> = lockers.into_iter().map(|l| l.entry).collect();
    let transport = inner.current_transport()?;
    transport.acquire_multi(&entries, cancel).await?;

    Ok(Locked {
        map: Arc::downgrade(&inner),
        entries,
    })
}
