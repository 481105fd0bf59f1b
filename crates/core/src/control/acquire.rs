// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Acquisition primitive: a reader/writer discipline over one weighted
//! semaphore, idempotent per operator.
//!
//! A shared acquire consumes one unit, an exclusive acquire consumes the
//! whole capacity. The holders map makes repeat acquires and releases by the
//! same operator no-ops, which keeps retried RPCs harmless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::sync::Semaphore;

/// Per-resource acquisition state: one semaphore plus the holders map.
#[derive(Clone)]
pub struct AcquisitionCtl {
    inner: Arc<Inner>,
}

struct Inner {
    sem: Semaphore,
    max: i64,
    holders: Mutex<HashMap<String, i64>>,
}

impl AcquisitionCtl {
    pub fn new(max: i64) -> Self {
        Self::with_held(max, HashMap::new())
    }

    /// Construct with `holders` already granted (replay): the semaphore
    /// starts with the sum of their weights consumed.
    pub fn with_held(max: i64, holders: HashMap<String, i64>) -> Self {
        let held: i64 = holders.values().copied().filter(|n| *n > 0).sum();
        Self {
            inner: Arc::new(Inner {
                sem: Semaphore::with_held(max, held),
                max,
                holders: Mutex::new(holders),
            }),
        }
    }

    pub fn max(&self) -> i64 {
        self.inner.max
    }

    /// Start an acquisition for `operator`.
    ///
    /// If the operator already holds the resource this returns
    /// `(None, false)` without touching the semaphore. Otherwise the holder
    /// is recorded and the request's queue position is fixed before this
    /// call returns; the remaining wait runs on a background task, and the
    /// receiver reports the granted weight (or cancellation, in which case
    /// the holder entry has already been removed).
    pub fn acquire(
        &self,
        operator: &str,
        exclusive: bool,
        cancel: CancellationToken,
    ) -> (Option<oneshot::Receiver<Result<i64>>>, bool) {
        let n = if exclusive { self.inner.max } else { 1 };
        {
            let mut holders = self.lock_holders();
            if holders.contains_key(operator) {
                return (None, false);
            }
            holders.insert(operator.to_string(), n);
        }
        let start = self.inner.sem.start_acquire(n);

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let operator = operator.to_string();
        tokio::spawn(async move {
            let outcome = inner.sem.wait(n, start, &cancel).await;
            if outcome.is_err() {
                inner
                    .holders
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&operator);
            }
            let _ = tx.send(outcome);
        });
        (Some(rx), true)
    }

    /// Whether `operator` currently holds the resource.
    pub fn is_holder(&self, operator: &str) -> bool {
        self.lock_holders().contains_key(operator)
    }

    /// Weight held by `operator`, if any.
    pub fn held(&self, operator: &str) -> Option<i64> {
        self.lock_holders().get(operator).copied()
    }

    /// Release the operator's hold. Returns `false` (and does nothing) when
    /// the operator holds nothing.
    ///
    /// The semaphore is notified after the holders mutex is dropped, so a
    /// woken waiter can re-enter without contending on it.
    pub fn release(&self, operator: &str) -> bool {
        let n = {
            let mut holders = self.lock_holders();
            match holders.remove(operator) {
                Some(n) => n,
                None => return false,
            }
        };
        self.inner.sem.release(n);
        true
    }

    fn lock_holders(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.inner.holders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "acquire_tests.rs"]
mod tests;
