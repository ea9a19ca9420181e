/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Bounded worker pools.
//!
//! A [`WorkerPool`] caps how many tasks run concurrently using a semaphore
//! with a fixed permit count. Task wrappers acquire an owned permit before
//! running their body and release it on every exit path.
//!
//! Shutdown is two-phase: the pool first stops accepting work (queued
//! acquires fail immediately and are counted as dropped), then waits up to
//! a grace period for in-flight tasks to finish before broadcasting an
//! abort signal that cooperative task wrappers observe.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// How often the shutdown loop re-checks for idleness.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Error returned by [`WorkerPool::acquire`] once the pool has shut down.
#[derive(Debug, Error)]
#[error("worker pool '{pool}' is no longer accepting tasks")]
pub struct PoolClosed {
    pool: String,
}

/// Counts reported by [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolShutdownSummary {
    /// Tasks that never ran because the pool shut down first.
    pub dropped: usize,
    /// In-flight tasks aborted after the grace period expired.
    pub aborted: usize,
}

/// A named pool that bounds task concurrency.
///
/// The pool itself does not spawn anything; callers spawn their own tasks
/// and gate the task body behind [`acquire`](WorkerPool::acquire). This
/// keeps the pool a pure capacity limiter while the runtime schedules the
/// tasks.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    accepting: AtomicBool,
    dropped: AtomicUsize,
    aborted: AtomicUsize,
    abort_tx: watch::Sender<bool>,
    abort_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    /// Creates a pool that runs at most `capacity` tasks at once.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        // a pool with no permits could never run anything
        let capacity = capacity.max(1);
        let (abort_tx, abort_rx) = watch::channel(false);
        let name = name.into();
        debug!(pool = %name, capacity, "worker pool created");
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            accepting: AtomicBool::new(true),
            dropped: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            abort_tx,
            abort_rx,
        }
    }

    /// The pool's name, used in logs and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of concurrently running tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires a run slot, waiting until one is free.
    ///
    /// Fails once the pool has shut down; each failed acquire is counted
    /// as a dropped task.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolClosed> {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => Ok(permit),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                Err(PoolClosed {
                    pool: self.name.clone(),
                })
            }
        }
    }

    /// Resolves once the pool has broadcast its abort signal.
    ///
    /// Task wrappers race their body against this future so that a
    /// shutdown past its grace period can reclaim the slot.
    pub(crate) async fn aborted(&self) {
        let mut rx = self.abort_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender lives as long as the pool; if it is ever gone no
                // abort can follow
                std::future::pending::<()>().await;
            }
        }
    }

    /// Records that an in-flight task was cut short by the abort signal.
    pub(crate) fn note_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether the pool still accepts new submissions.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Whether no task currently holds a run slot.
    pub fn is_idle(&self) -> bool {
        self.semaphore.available_permits() == self.capacity
    }

    /// Whether the pool has shut down and finished all in-flight work.
    pub fn is_terminated(&self) -> bool {
        !self.is_accepting() && self.is_idle()
    }

    /// Tasks that never ran because the pool shut down first.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// In-flight tasks aborted during shutdown.
    pub fn aborted_count(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Shuts the pool down.
    ///
    /// Stops accepting new submissions immediately (queued acquires fail
    /// and are counted as dropped), waits up to `grace` for in-flight
    /// tasks to finish, then broadcasts the abort signal and waits for
    /// the survivors to release their slots.
    ///
    /// Safe to call more than once; later calls drain whatever is left.
    pub async fn shutdown(&self, grace: Duration) -> PoolShutdownSummary {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(pool = %self.name, grace = ?grace, "worker pool shutting down");
        }
        self.semaphore.close();

        let deadline = tokio::time::Instant::now() + grace;
        while !self.is_idle() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(IDLE_POLL).await;
        }

        if !self.is_idle() {
            warn!(
                pool = %self.name,
                "grace period expired with tasks still in flight; aborting them"
            );
            let _ = self.abort_tx.send(true);
            // wrappers race their body against the abort signal, so the
            // remaining slots come back promptly
            while !self.is_idle() {
                tokio::time::sleep(IDLE_POLL).await;
            }
        }

        let summary = PoolShutdownSummary {
            dropped: self.dropped(),
            aborted: self.aborted_count(),
        };
        info!(
            pool = %self.name,
            dropped = summary.dropped,
            aborted = summary.aborted,
            "worker pool shut down"
        );
        summary
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.is_accepting() {
            debug!(pool = %self.name, "worker pool dropped without shutdown");
        }
    }
}
