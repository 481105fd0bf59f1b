// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side resource map: the same surface as the coordinator, forwarded
//! over HTTP.
//!
//! Every call re-reads the address file on each attempt, because the
//! coordinator may have moved between retries. Only transport failures are
//! retried; taxonomy errors decoded from the response body are returned
//! as-is.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rsmap_core::{CallerContext, Error, Result};
use rsmap_daemon::protocol::{
    AcquireMultiEntry, AcquireMultiRequest, AcquireRequest, CompleteInitRequest, Empty, ErrorBody,
    FailInitRequest, ReleaseMultiEntry, ReleaseMultiRequest, ReleaseRequest, TryInitRequest,
    TryInitResponse, ACQUIRE_MULTI_PATH, ACQUIRE_PATH, COMPLETE_INIT_PATH, FAIL_INIT_PATH,
    RELEASE_MULTI_PATH, RELEASE_PATH, STATUS_PATH, TRY_INIT_PATH,
};
use rsmap_daemon::{AcquireEntry, MapDirs, ReleaseEntry, ResourceMap};

const PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-call retry policy for transport failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 10,
        }
    }
}

/// Probe whether a published coordinator address answers.
pub(crate) async fn ping(http: &reqwest::Client, addr: &str) -> bool {
    let url = format!("{addr}{STATUS_PATH}");
    match http.get(url).timeout(PING_TIMEOUT).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Resource map that forwards every operation to the published coordinator.
pub struct ClientSideMap {
    dirs: MapDirs,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl ClientSideMap {
    pub fn new(dirs: MapDirs, http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { dirs, http, retry }
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req, cancel: &CancellationToken) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(path, request, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    debug!(path, attempt, error = %err, "rpc attempt failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.retry.interval) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let addr = self
            .dirs
            .read_addr()
            .ok_or_else(|| Error::transport("coordinator address not published"))?;
        let url = format!("{addr}{path}");

        let send = self.http.post(&url).json(request).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response.map_err(Error::transport)?,
        };

        if response.status().is_success() {
            return response.json::<Resp>().await.map_err(Error::transport);
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(body.into()),
            Err(err) => Err(Error::transport(err)),
        }
    }
}

#[async_trait]
impl ResourceMap for ClientSideMap {
    async fn try_init(
        &self,
        resource: &str,
        operator: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let request = TryInitRequest {
            resource: resource.to_string(),
            client_id: operator.clone(),
        };
        let response: TryInitResponse = self.post(TRY_INIT_PATH, &request, cancel).await?;
        Ok(response.should_try)
    }

    async fn complete_init(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        let request = CompleteInitRequest {
            resource: resource.to_string(),
            client_id: operator.clone(),
        };
        let _: Empty = self
            .post(COMPLETE_INIT_PATH, &request, &CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn fail_init(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        let request = FailInitRequest {
            resource: resource.to_string(),
            client_id: operator.clone(),
        };
        let _: Empty = self
            .post(FAIL_INIT_PATH, &request, &CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn acquire(
        &self,
        resource: &str,
        operator: &CallerContext,
        max: i64,
        exclusive: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = AcquireRequest {
            resource: resource.to_string(),
            client_id: operator.clone(),
            max,
            exclusive,
        };
        let _: Empty = self.post(ACQUIRE_PATH, &request, cancel).await?;
        Ok(())
    }

    async fn acquire_multi(
        &self,
        entries: &[AcquireEntry],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = AcquireMultiRequest {
            entries: entries.iter().map(AcquireMultiEntry::from).collect(),
        };
        let _: Empty = self.post(ACQUIRE_MULTI_PATH, &request, cancel).await?;
        Ok(())
    }

    async fn release(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        let request = ReleaseRequest {
            resource: resource.to_string(),
            client_id: operator.clone(),
        };
        let _: Empty = self
            .post(RELEASE_PATH, &request, &CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn release_multi(&self, entries: &[ReleaseEntry]) -> Result<()> {
        let request = ReleaseMultiRequest {
            entries: entries.iter().map(ReleaseMultiEntry::from).collect(),
        };
        let _: Empty = self
            .post(RELEASE_MULTI_PATH, &request, &CancellationToken::new())
            .await?;
        Ok(())
    }
}
