// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The resource-map surface, implemented once over the controllers and once
//! (in the facade crate) over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rsmap_core::{CallerContext, Result};
use rsmap_storage::{Database, RecordStore};

use crate::acquire::{AcquireController, AcquireEntry, ReleaseEntry};
use crate::init::InitController;

/// Control operations shared by the in-process coordinator and the RPC
/// client. The facade swaps between the two implementations at election
/// time.
#[async_trait]
pub trait ResourceMap: Send + Sync {
    async fn try_init(
        &self,
        resource: &str,
        operator: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    async fn complete_init(&self, resource: &str, operator: &CallerContext) -> Result<()>;

    async fn fail_init(&self, resource: &str, operator: &CallerContext) -> Result<()>;

    async fn acquire(
        &self,
        resource: &str,
        operator: &CallerContext,
        max: i64,
        exclusive: bool,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn acquire_multi(
        &self,
        entries: &[AcquireEntry],
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn release(&self, resource: &str, operator: &CallerContext) -> Result<()>;

    async fn release_multi(&self, entries: &[ReleaseEntry]) -> Result<()>;
}

/// The coordinator's own map: controllers over the exclusively-owned
/// database.
pub struct ServerSideMap {
    init: InitController,
    acquire: AcquireController,
}

impl ServerSideMap {
    /// Replay the stored records and build the live controllers.
    pub async fn load(
        db: Arc<Database>,
        grace: Duration,
        closing: CancellationToken,
    ) -> Result<Self> {
        let init =
            InitController::load(RecordStore::new(Arc::clone(&db)), closing.clone()).await?;
        let acquire = AcquireController::load(RecordStore::new(db), grace, closing)?;
        Ok(Self { init, acquire })
    }
}

#[async_trait]
impl ResourceMap for ServerSideMap {
    async fn try_init(
        &self,
        resource: &str,
        operator: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.init.try_init(resource, operator, cancel).await
    }

    async fn complete_init(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        self.init.complete(resource, operator)
    }

    async fn fail_init(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        self.init.fail(resource, operator)
    }

    async fn acquire(
        &self,
        resource: &str,
        operator: &CallerContext,
        max: i64,
        exclusive: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.acquire
            .acquire(resource, operator, max, exclusive, cancel)
            .await
    }

    async fn acquire_multi(
        &self,
        entries: &[AcquireEntry],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.acquire.acquire_multi(entries, cancel).await
    }

    async fn release(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        self.acquire.release(resource, operator)
    }

    async fn release_multi(&self, entries: &[ReleaseEntry]) -> Result<()> {
        self.acquire.release_multi(entries)
    }
}
