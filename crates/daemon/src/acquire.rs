// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Acquire controller: binds the acquisition primitive and the replay queue
//! to the persisted record.
//!
//! Log-write ordering is part of the crash contract. ACQUIRING is appended
//! before the semaphore wait, so an interrupted wait replays as a queued
//! acquirer; ACQUIRED is appended after the grant; RELEASED is appended
//! before the in-memory release. No compensation entry is written when a
//! wait fails after ACQUIRING.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rsmap_core::control::AcquisitionCtl;
use rsmap_core::sync::{rendezvous, LimitedTermQueue};
use rsmap_core::{CallerContext, Error, Result};
use rsmap_storage::{now_nanos, AcquireEvent, AcquireLog, AcquireRecord, RecordStore};

/// One resource of a multi-acquire request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquireEntry {
    pub resource: String,
    pub context: CallerContext,
    pub max: i64,
    pub exclusive: bool,
}

/// One resource of a multi-release request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseEntry {
    pub resource: String,
    pub context: CallerContext,
}

struct ResourceState {
    queue: Arc<LimitedTermQueue>,
    ctl: AcquisitionCtl,
}

/// Controls lock acquisition for the coordinator.
pub struct AcquireController {
    store: RecordStore<AcquireRecord>,
    resources: Mutex<HashMap<String, Arc<ResourceState>>>,
    // Serializes the initiation phase of multi-acquires so that two
    // overlapping multi-lock requests cannot form a wait cycle.
    multi: tokio::sync::Mutex<()>,
    closing: CancellationToken,
}

impl AcquireController {
    /// Rebuild acquisition state from the stored records.
    ///
    /// Scanning each record in order: ACQUIRING queues the operator for the
    /// replay rendezvous, ACQUIRED converts it into a live holder, RELEASED
    /// clears it. Replayed queues stay authoritative for `grace`.
    pub fn load(
        store: RecordStore<AcquireRecord>,
        grace: Duration,
        closing: CancellationToken,
    ) -> Result<Self> {
        let mut stored = Vec::new();
        store.for_each(|name, record: AcquireRecord| stored.push((name.to_string(), record)))?;

        let mut resources = HashMap::new();
        for (name, record) in stored {
            let mut held = HashMap::new();
            let mut builder = rendezvous::Builder::new();
            for log in &record.logs {
                let operator = log.context.key();
                match log.event {
                    AcquireEvent::Acquiring => builder.add(&operator),
                    AcquireEvent::Acquired => {
                        held.insert(operator.clone(), log.n);
                        builder.remove(&operator);
                    }
                    AcquireEvent::Released => {
                        held.remove(&operator);
                    }
                }
            }
            debug!(
                resource = %name,
                holders = held.len(),
                "replayed acquisition record"
            );
            resources.insert(
                name,
                Arc::new(ResourceState {
                    queue: builder.start(grace),
                    ctl: AcquisitionCtl::with_held(record.max, held),
                }),
            );
        }
        info!(resources = resources.len(), "acquisition records replayed");

        Ok(Self {
            store,
            resources: Mutex::new(resources),
            multi: tokio::sync::Mutex::new(()),
            closing,
        })
    }

    /// Acquire `resource` for `operator`, exclusively or shared.
    ///
    /// `max` fixes the capacity if this is the first acquisition of the
    /// resource; later values are ignored.
    pub async fn acquire(
        &self,
        resource: &str,
        operator: &CallerContext,
        max: i64,
        exclusive: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }
        let state = self.state(resource, max);
        let op = operator.key();

        // Replayed acquirers go first; the acquisition is initiated inside
        // the dequeue callback so nobody slips in between.
        let rx = match state
            .queue
            .dequeue(&op, |_| state.ctl.acquire(&op, exclusive, cancel.clone()))
            .await
        {
            (Some(rx), true) => rx,
            _ => return Ok(()), // already held by this operator
        };

        self.store.put(&[resource], |_, record, exists| {
            if !exists {
                record.max = max;
            }
            record.logs.push(AcquireLog {
                event: AcquireEvent::Acquiring,
                n: 0,
                context: operator.clone(),
                ts: now_nanos(),
            });
        })?;

        let granted = tokio::select! {
            _ = self.closing.cancelled() => return Err(Error::Closing),
            outcome = rx => outcome.map_err(|_| Error::Cancelled)??,
        };

        self.store.put(&[resource], |_, record, _| {
            record.logs.push(AcquireLog {
                event: AcquireEvent::Acquired,
                n: granted,
                context: operator.clone(),
                ts: now_nanos(),
            });
        })?;
        Ok(())
    }

    /// Acquire several resources for their operators in one request.
    ///
    /// Initiation of every entry happens under the multi lock; the ACQUIRING
    /// entries are appended in one transaction with a single timestamp; the
    /// grants are awaited concurrently. A failing entry does not roll back
    /// siblings that already acquired: those stay held until the caller's
    /// eventual release or coordinator shutdown. CLOSING wins over other
    /// errors in the aggregate.
    pub async fn acquire_multi(
        &self,
        entries: &[AcquireEntry],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }

        let mut acquiring = Vec::new();
        {
            let _guard = self.multi.lock().await;
            for entry in entries {
                let state = self.state(&entry.resource, entry.max);
                let op = entry.context.key();
                if let (Some(rx), true) = state
                    .queue
                    .dequeue(&op, |_| state.ctl.acquire(&op, entry.exclusive, cancel.clone()))
                    .await
                {
                    acquiring.push((entry.clone(), rx));
                }
            }
        }
        if acquiring.is_empty() {
            return Ok(());
        }

        let ts = now_nanos();
        let names: Vec<&str> = acquiring.iter().map(|(e, _)| e.resource.as_str()).collect();
        self.store.put(&names, |name, record, exists| {
            let Some((entry, _)) = acquiring.iter().find(|(e, _)| e.resource == name) else {
                return;
            };
            if !exists {
                record.max = entry.max;
            }
            record.logs.push(AcquireLog {
                event: AcquireEvent::Acquiring,
                n: 0,
                context: entry.context.clone(),
                ts,
            });
        })?;

        let waits = acquiring.into_iter().map(|(entry, rx)| async move {
            let granted = tokio::select! {
                _ = self.closing.cancelled() => return Err(Error::Closing),
                outcome = rx => outcome.map_err(|_| Error::Cancelled)??,
            };
            self.store.put(&[entry.resource.as_str()], |_, record, _| {
                record.logs.push(AcquireLog {
                    event: AcquireEvent::Acquired,
                    n: granted,
                    context: entry.context.clone(),
                    ts: now_nanos(),
                });
            })?;
            Ok(())
        });

        let mut aggregate = Ok(());
        for result in futures::future::join_all(waits).await {
            match result {
                Ok(()) => {}
                Err(Error::Closing) => return Err(Error::Closing),
                Err(err) if aggregate.is_ok() => aggregate = Err(err),
                Err(_) => {}
            }
        }
        aggregate
    }

    /// Release the operator's hold on `resource`; unknown resources and
    /// non-holders are a successful no-op.
    pub fn release(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }
        let Some(state) = self.lock_resources().get(resource).cloned() else {
            return Ok(());
        };
        let op = operator.key();
        if !state.ctl.is_holder(&op) {
            return Ok(());
        }

        // RELEASED goes to disk before the in-memory release: on a crash in
        // between, replay treats the trailing RELEASED as cancelling the
        // holder rather than resurrecting it.
        self.store.put(&[resource], |_, record, _| {
            record.logs.push(AcquireLog {
                event: AcquireEvent::Released,
                n: 0,
                context: operator.clone(),
                ts: now_nanos(),
            });
        })?;
        state.ctl.release(&op);
        Ok(())
    }

    /// Release several holds in one request: one transaction for the
    /// RELEASED entries, then the in-memory releases.
    pub fn release_multi(&self, entries: &[ReleaseEntry]) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }

        let mut resolved = Vec::new();
        for entry in entries {
            let Some(state) = self.lock_resources().get(&entry.resource).cloned() else {
                continue;
            };
            let op = entry.context.key();
            if !state.ctl.is_holder(&op) {
                continue;
            }
            resolved.push((entry, state, op));
        }
        if resolved.is_empty() {
            return Ok(());
        }

        let ts = now_nanos();
        let names: Vec<&str> = resolved.iter().map(|(e, _, _)| e.resource.as_str()).collect();
        let put_result = self.store.put(&names, |name, record, _| {
            let Some((entry, _, _)) = resolved.iter().find(|(e, _, _)| e.resource == name) else {
                return;
            };
            record.logs.push(AcquireLog {
                event: AcquireEvent::Released,
                n: 0,
                context: entry.context.clone(),
                ts,
            });
        });

        // In-memory holds are cleared even when the append failed.
        for (_, state, op) in &resolved {
            state.ctl.release(op);
        }
        put_result?;
        Ok(())
    }

    fn state(&self, resource: &str, max: i64) -> Arc<ResourceState> {
        let mut resources = self.lock_resources();
        Arc::clone(
            resources
                .entry(resource.to_string())
                .or_insert_with(|| {
                    Arc::new(ResourceState {
                        queue: LimitedTermQueue::empty(),
                        ctl: AcquisitionCtl::new(max),
                    })
                }),
        )
    }

    fn lock_resources(&self) -> MutexGuard<'_, HashMap<String, Arc<ResourceState>>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "acquire_tests.rs"]
mod tests;
