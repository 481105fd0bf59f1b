// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Init controller: binds the init primitive to the persisted record.
//!
//! Events are appended after the in-memory transition succeeds. If the
//! append then fails, memory and disk disagree; the coordinator is the only
//! writer of both, so the error is simply reported and the next operation
//! sees the in-memory state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rsmap_core::control::InitCtl;
use rsmap_core::{CallerContext, Error, Result};
use rsmap_storage::{now_nanos, InitEvent, InitLog, InitRecord, RecordStore};

/// Controls resource initialization for the coordinator.
pub struct InitController {
    store: RecordStore<InitRecord>,
    resources: Mutex<HashMap<String, Arc<InitCtl>>>,
    closing: CancellationToken,
}

impl InitController {
    /// Rebuild init state from the stored records.
    ///
    /// A record whose last event is FAILED leaves the slot free. COMPLETED
    /// seeds a finished primitive. A trailing STARTED means the coordinator
    /// died mid-init: the slot is pre-locked for the recorded operator so its
    /// retry (or completion) goes through, and nobody else steals the slot.
    pub async fn load(
        store: RecordStore<InitRecord>,
        closing: CancellationToken,
    ) -> Result<Self> {
        let mut stored = Vec::new();
        store.for_each(|name, record: InitRecord| stored.push((name.to_string(), record)))?;

        let mut resources = HashMap::new();
        for (name, record) in stored {
            let Some(last) = record.last() else {
                continue;
            };
            match last.event {
                InitEvent::Failed => continue,
                InitEvent::Completed => {
                    resources.insert(name, Arc::new(InitCtl::new(true)));
                }
                InitEvent::Started => {
                    let ctl = InitCtl::new(false);
                    ctl.try_init(&last.context.key(), &CancellationToken::new())
                        .await?;
                    debug!(resource = %name, operator = %last.context, "replayed in-flight init");
                    resources.insert(name, Arc::new(ctl));
                }
            }
        }
        info!(resources = resources.len(), "init records replayed");

        Ok(Self {
            store,
            resources: Mutex::new(resources),
            closing,
        })
    }

    /// Whether `operator` should run the init body for `resource`.
    ///
    /// Appends STARTED when this call freshly takes the init lock.
    pub async fn try_init(
        &self,
        resource: &str,
        operator: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }
        let ctl = {
            let mut resources = self.lock_resources();
            Arc::clone(
                resources
                    .entry(resource.to_string())
                    .or_insert_with(|| Arc::new(InitCtl::new(false))),
            )
        };

        let operator_key = operator.key();
        let result = tokio::select! {
            _ = self.closing.cancelled() => return Err(Error::Closing),
            result = ctl.try_init(&operator_key, cancel) => result?,
        };
        if !result.should_try {
            return Ok(false);
        }

        if result.initiated {
            self.store.put(&[resource], |_, record, _| {
                record.logs.push(InitLog {
                    event: InitEvent::Started,
                    context: operator.clone(),
                    ts: now_nanos(),
                });
            })?;
        }
        Ok(true)
    }

    /// Mark the resource as initialized and append COMPLETED.
    pub fn complete(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }
        let ctl = self
            .lock_resources()
            .get(resource)
            .cloned()
            .ok_or_else(|| Error::not_found(resource))?;

        ctl.complete(&operator.key())?;
        self.store.put(&[resource], |_, record, _| {
            record.logs.push(InitLog {
                event: InitEvent::Completed,
                context: operator.clone(),
                ts: now_nanos(),
            });
        })?;
        Ok(())
    }

    /// Record a failed attempt and free the slot; appends FAILED.
    pub fn fail(&self, resource: &str, operator: &CallerContext) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::Closing);
        }
        let ctl = self
            .lock_resources()
            .get(resource)
            .cloned()
            .ok_or_else(|| Error::not_found(resource))?;

        ctl.fail(&operator.key())?;
        self.store.put(&[resource], |_, record, _| {
            record.logs.push(InitLog {
                event: InitEvent::Failed,
                context: operator.clone(),
                ts: now_nanos(),
            });
        })?;
        Ok(())
    }

    fn lock_resources(&self) -> MutexGuard<'_, HashMap<String, Arc<InitCtl>>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
