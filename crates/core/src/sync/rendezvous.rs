// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Limited-term rendezvous queue.
//!
//! After a coordinator restart, operators that were replayed mid-acquire
//! must start their next acquisition ahead of fresh arrivals. The queue
//! freezes that replayed order and hands each operator its turn; once the
//! queue drains or the grace period elapses, every remaining `dequeue`
//! completes with `false` and normal ordering resumes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Collects operator identifiers in replay order before the queue starts.
#[derive(Debug, Default)]
pub struct Builder {
    order: Vec<String>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `op` unless it is already queued.
    pub fn add(&mut self, op: &str) {
        if !self.order.iter().any(|o| o == op) {
            self.order.push(op.to_string());
        }
    }

    /// Remove `op` by identity; absent operators are ignored.
    pub fn remove(&mut self, op: &str) {
        self.order.retain(|o| o != op);
    }

    /// Freeze the collected order into a queue that stays authoritative for
    /// at most `timeout`.
    pub fn start(self, timeout: Duration) -> Arc<LimitedTermQueue> {
        let queue = Arc::new(LimitedTermQueue {
            inner: Mutex::new(self.order.into_iter().collect()),
            notify: Notify::new(),
            done: CancellationToken::new(),
        });

        if queue.lock().is_empty() {
            queue.done.cancel();
        } else {
            let q = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => q.done.cancel(),
                    _ = q.done.cancelled() => {}
                }
            });
        }
        queue
    }
}

/// Frozen replay queue; see [`Builder::start`].
#[derive(Debug)]
pub struct LimitedTermQueue {
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    done: CancellationToken,
}

impl LimitedTermQueue {
    /// A queue that is already past its term; every `dequeue` completes
    /// immediately with `false`.
    pub fn empty() -> Arc<Self> {
        Builder::new().start(Duration::ZERO)
    }

    /// Wait until `op` reaches the head of the queue or the term ends.
    ///
    /// When `op` is dequeued at the head, `f(true)` runs under the internal
    /// mutex so the caller can start its next step atomically with being
    /// dequeued. When the term ends first (timeout, or the queue drained and
    /// `op` was never in it), `f(false)` runs instead.
    pub async fn dequeue<R>(&self, op: &str, f: impl FnOnce(bool) -> R) -> R {
        let mut notified = std::pin::pin!(self.notify.notified());
        loop {
            {
                let mut queue = self.lock();
                if self.done.is_cancelled() {
                    return f(false);
                }
                if queue.front().map(String::as_str) == Some(op) {
                    queue.pop_front();
                    if queue.is_empty() {
                        self.done.cancel();
                    }
                    let result = f(true);
                    self.notify.notify_waiters();
                    return result;
                }
                // Register for the next broadcast while still holding the
                // queue lock; broadcasts also happen under it.
                notified.as_mut().enable();
            }

            tokio::select! {
                _ = self.done.cancelled() => {
                    // Serialize with a grant in flight: its callback runs
                    // under the queue lock and must finish first.
                    let _queue = self.lock();
                    return f(false);
                }
                _ = notified.as_mut() => notified.set(self.notify.notified()),
            }
        }
    }

    /// Number of operators still queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "rendezvous_tests.rs"]
mod tests;
