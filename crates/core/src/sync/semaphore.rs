// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Weighted counting semaphore with FIFO grant ordering.
//!
//! Once a waiter is queued, later requests queue behind it even when they
//! would fit the free capacity. Without this, a stream of small requests
//! could starve a large (exclusive) one forever.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Weighted semaphore with capacity `max`.
pub struct Semaphore {
    max: i64,
    state: Mutex<State>,
}

struct State {
    held: i64,
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    id: u64,
    n: i64,
    tx: oneshot::Sender<()>,
    // Set (under the state mutex) when the grant consumed capacity for this
    // waiter; the cancellation path reads it to tell a consumed grant from a
    // skipped-over waiter.
    granted: Arc<AtomicBool>,
}

/// Outcome of [`Semaphore::start_acquire`]: either the capacity was granted
/// on the spot, or the request holds a place in the FIFO queue.
pub enum Start {
    Granted,
    Waiting {
        id: u64,
        rx: oneshot::Receiver<()>,
        granted: Arc<AtomicBool>,
    },
}

impl Semaphore {
    pub fn new(max: i64) -> Self {
        Self::with_held(max, 0)
    }

    /// Construct with `held` units already consumed (replay of prior grants).
    pub fn with_held(max: i64, held: i64) -> Self {
        Self {
            max,
            state: Mutex::new(State {
                held,
                next_id: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// Fix this request's place in line: grant immediately when the free
    /// capacity fits and nobody is waiting, otherwise enqueue.
    ///
    /// The queue position is taken synchronously, so callers that must not
    /// be overtaken can initiate under their own lock and await the grant
    /// later. Requesting more than the total capacity is a programmer error
    /// and panics.
    pub fn start_acquire(&self, n: i64) -> Start {
        if n > self.max {
            panic!("semaphore: acquire {} exceeds capacity {}", n, self.max);
        }
        let mut state = self.lock();
        if self.max - state.held >= n && state.waiters.is_empty() {
            state.held += n;
            return Start::Granted;
        }
        let (tx, rx) = oneshot::channel();
        let granted = Arc::new(AtomicBool::new(false));
        state.next_id += 1;
        let id = state.next_id;
        state.waiters.push_back(Waiter {
            id,
            n,
            tx,
            granted: Arc::clone(&granted),
        });
        Start::Waiting { id, rx, granted }
    }

    /// Await the grant initiated by [`Semaphore::start_acquire`].
    ///
    /// Returns the granted weight, or [`Error::Cancelled`] once `cancel`
    /// fires. A cancelled wait consumes no capacity.
    pub async fn wait(&self, n: i64, start: Start, cancel: &CancellationToken) -> Result<i64> {
        let (id, rx, granted) = match start {
            Start::Granted => return Ok(n),
            Start::Waiting { id, rx, granted } => (id, rx, granted),
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                let mut state = self.lock();
                if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                    state.waiters.remove(pos);
                    self.wake_waiters(&mut state);
                    return Err(Error::Cancelled);
                }
                // No longer queued: either the grant consumed capacity for
                // us just before the cancellation, or the wake loop skipped
                // us after the receiver was dropped.
                if granted.load(Ordering::SeqCst) {
                    Ok(n)
                } else {
                    Err(Error::Cancelled)
                }
            }
            _ = rx => Ok(n),
        }
    }

    /// Acquire `n` units, waiting in FIFO order behind earlier requests.
    pub async fn acquire(&self, n: i64, cancel: &CancellationToken) -> Result<i64> {
        let start = self.start_acquire(n);
        self.wait(n, start, cancel).await
    }

    /// Return `n` units to the pool and wake waiters in FIFO order.
    ///
    /// Panics when more is released than is currently held.
    pub fn release(&self, n: i64) {
        let mut state = self.lock();
        state.held -= n;
        if state.held < 0 {
            panic!("semaphore: released more than held");
        }
        self.wake_waiters(&mut state);
    }

    /// Capacity currently available, for introspection in logs and tests.
    pub fn available(&self) -> i64 {
        let state = self.lock();
        self.max - state.held
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grant from the head of the queue while requests fit. A head that no
    /// longer fits stops the loop unless its receiver is gone, preserving
    /// FIFO order for live waiters.
    fn wake_waiters(&self, state: &mut State) {
        loop {
            let Some(head) = state.waiters.front() else {
                break;
            };
            if self.max - state.held < head.n {
                if head.tx.is_closed() {
                    state.waiters.pop_front();
                    continue;
                }
                break;
            }
            if let Some(waiter) = state.waiters.pop_front() {
                if waiter.tx.send(()).is_ok() {
                    waiter.granted.store(true, Ordering::SeqCst);
                    state.held += waiter.n;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
