// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Init primitive: once-with-retry initialization of a resource.
//!
//! Exactly one operator holds the init lock at a time. Completion is
//! terminal; a failure frees the slot for the next operator to retry.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Semaphore as PermitSemaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Outcome of a [`InitCtl::try_init`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TryInit {
    /// Whether the operator should run (or keep running) the init body.
    pub should_try: bool,
    /// Whether this call freshly acquired the init lock. A re-entry by the
    /// operator that already holds the lock reports `false` here.
    pub initiated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Locked(String),
    Completed,
}

/// Per-resource init state machine.
pub struct InitCtl {
    // One permit; held (forgotten) while an operator runs init. Released by
    // `complete`/`fail`, which may be called from a different task than the
    // one that acquired it.
    lock: PermitSemaphore,
    state: Mutex<State>,
}

impl InitCtl {
    pub fn new(completed: bool) -> Self {
        Self {
            lock: PermitSemaphore::new(1),
            state: Mutex::new(if completed {
                State::Completed
            } else {
                State::Idle
            }),
        }
    }

    /// Try to take the init lock for `operator`.
    ///
    /// Already-completed resources report `should_try = false`. The operator
    /// that currently holds the lock gets a second chance
    /// (`should_try = true, initiated = false`) without re-acquiring, which
    /// covers a lost response to its original attempt. Everyone else waits
    /// for the lock or for `cancel`.
    pub async fn try_init(&self, operator: &str, cancel: &CancellationToken) -> Result<TryInit> {
        {
            let state = self.lock_state();
            match &*state {
                State::Completed => {
                    return Ok(TryInit {
                        should_try: false,
                        initiated: false,
                    })
                }
                State::Locked(holder) if holder == operator => {
                    return Ok(TryInit {
                        should_try: true,
                        initiated: false,
                    })
                }
                _ => {}
            }
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.lock.acquire() => permit.map_err(|_| Error::Closing)?,
        };

        let mut state = self.lock_state();
        if *state == State::Completed {
            // Completed while we waited; the permit goes straight back.
            drop(permit);
            return Ok(TryInit {
                should_try: false,
                initiated: false,
            });
        }
        *state = State::Locked(operator.to_string());
        permit.forget();
        Ok(TryInit {
            should_try: true,
            initiated: true,
        })
    }

    /// Mark the init as completed and release the lock.
    ///
    /// Fails with [`Error::InvalidOperation`] unless `operator` holds the
    /// lock. Once completed, no further state transitions happen.
    pub fn complete(&self, operator: &str) -> Result<()> {
        let mut state = self.lock_state();
        match &*state {
            State::Locked(holder) if holder == operator => {
                *state = State::Completed;
                self.lock.add_permits(1);
                Ok(())
            }
            _ => Err(Error::invalid_operation(format!(
                "complete: init lock not held by {operator}"
            ))),
        }
    }

    /// Mark the attempt as failed, freeing the slot for the next operator.
    pub fn fail(&self, operator: &str) -> Result<()> {
        let mut state = self.lock_state();
        match &*state {
            State::Locked(holder) if holder == operator => {
                *state = State::Idle;
                self.lock.add_permits(1);
                Ok(())
            }
            _ => Err(Error::invalid_operation(format!(
                "fail: init lock not held by {operator}"
            ))),
        }
    }

    /// Whether the resource finished initializing.
    pub fn is_completed(&self) -> bool {
        *self.lock_state() == State::Completed
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
