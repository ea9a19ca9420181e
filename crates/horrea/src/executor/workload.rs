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

//! Fixed-size workload scheduling.
//!
//! A [`WorkloadScheduler`] runs exactly N independent, uniquely-indexed
//! tasks on a [`WorkerPool`](super::WorkerPool) and lets any number of
//! callers wait until all N have finished. Iterations are numbered 1..=N;
//! submission order guarantees nothing about execution order.
//!
//! Failures never cascade: a task's error is caught at the boundary,
//! logged, and recorded, and the remaining iterations keep running. The
//! recorded failures come back as one aggregated [`WorkloadError`] from
//! [`wait_until_complete`](WorkloadScheduler::wait_until_complete).
//!
//! Every submitted task reaches the completed count on every exit path:
//! normal return, task error, panic, pool rejection, or shutdown abort.
//! Waiters can therefore never hang across a pool shutdown.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::pool::WorkerPool;

/// One recorded task failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The 1-based iteration that failed.
    pub iteration: usize,
    /// The failure rendered as a message.
    pub message: String,
}

/// Aggregated outcome of a failed workload.
#[derive(Debug, Clone, Error)]
pub enum WorkloadError {
    /// One or more iterations failed; the rest ran to completion.
    #[error("workload '{job}' finished with {} failed task(s)", failures.len())]
    TasksFailed {
        job: String,
        failures: Vec<TaskFailure>,
    },
}

type BoxedTaskFn = Arc<dyn Fn(usize) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct SchedulerState {
    job_name: String,
    iterations: usize,
    started: AtomicBool,
    completed: AtomicUsize,
    failures: Mutex<Vec<TaskFailure>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl SchedulerState {
    fn record_failure(&self, iteration: usize, message: String) {
        error!(
            job = %self.job_name,
            iteration,
            error = %message,
            "workload task failed"
        );
        self.failures.lock().push(TaskFailure { iteration, message });
    }

    /// Counts one finished task; whichever call brings the count to N
    /// releases the waiters.
    fn complete_one(&self) {
        let finished = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if finished == self.iterations {
            debug!(job = %self.job_name, "final workload task finished; releasing waiters");
            let _ = self.done_tx.send(true);
        }
    }
}

/// Runs N independent tasks on a bounded pool and tracks their joint
/// completion.
///
/// # Examples
///
/// ```rust,ignore
/// let pool = Arc::new(WorkerPool::new("blocks", 32));
/// let scheduler = WorkloadScheduler::new(pool, 3, "nightly-load", |iteration| async move {
///     run_block(iteration).await
/// });
/// scheduler.start();
/// scheduler.wait_until_complete().await?;
/// ```
pub struct WorkloadScheduler {
    pool: Arc<WorkerPool>,
    task: BoxedTaskFn,
    state: Arc<SchedulerState>,
}

impl WorkloadScheduler {
    /// Creates a scheduler for `iterations` invocations of `task` on
    /// `pool`.
    ///
    /// # Arguments
    ///
    /// * `pool` - The pool bounding how many tasks run at once
    /// * `iterations` - Number of tasks; may be zero
    /// * `job_name` - Human-readable name used in logs and failures
    /// * `task` - Async function invoked once per iteration, 1-based
    pub fn new<F, Fut>(
        pool: Arc<WorkerPool>,
        iterations: usize,
        job_name: impl Into<String>,
        task: F,
    ) -> Self
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            pool,
            task: Arc::new(move |iteration| task(iteration).boxed()),
            state: Arc::new(SchedulerState {
                job_name: job_name.into(),
                iterations,
                started: AtomicBool::new(false),
                completed: AtomicUsize::new(0),
                failures: Mutex::new(Vec::new()),
                done_tx,
                done_rx,
            }),
        }
    }

    /// The workload's human-readable name.
    pub fn job_name(&self) -> &str {
        &self.state.job_name
    }

    /// Number of tasks this workload schedules.
    pub fn iterations(&self) -> usize {
        self.state.iterations
    }

    /// Number of tasks that have finished so far.
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Whether `start` has been called.
    pub fn has_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Whether every task has finished.
    pub fn is_complete(&self) -> bool {
        *self.state.done_rx.borrow()
    }

    /// Number of failures recorded so far.
    pub fn failure_count(&self) -> usize {
        self.state.failures.lock().len()
    }

    /// Snapshot of the failures recorded so far.
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.state.failures.lock().clone()
    }

    /// Submits all N tasks. Non-blocking; a zero-task workload completes
    /// immediately.
    pub fn start(&self) {
        if self.state.started.swap(true, Ordering::SeqCst) {
            warn!(job = %self.state.job_name, "workload started more than once; ignoring");
            return;
        }

        debug!(
            job = %self.state.job_name,
            iterations = self.state.iterations,
            pool = %self.pool.name(),
            "starting workload"
        );

        if self.state.iterations == 0 {
            let _ = self.state.done_tx.send(true);
            return;
        }

        for iteration in 1..=self.state.iterations {
            let pool = self.pool.clone();
            let task = self.task.clone();
            let state = self.state.clone();

            tokio::spawn(async move {
                let permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        state.record_failure(iteration, format!("dropped before start: {e}"));
                        state.complete_one();
                        return;
                    }
                };

                let body = std::panic::AssertUnwindSafe((task)(iteration)).catch_unwind();
                let result = tokio::select! {
                    result = body => match result {
                        Ok(result) => result,
                        Err(panic) => Err(anyhow!("task panicked: {}", panic_message(panic.as_ref()))),
                    },
                    _ = pool.aborted() => {
                        pool.note_aborted();
                        Err(anyhow!("aborted during shutdown"))
                    }
                };
                drop(permit);

                if let Err(e) = result {
                    state.record_failure(iteration, e.to_string());
                }
                state.complete_one();
            });
        }
    }

    /// Suspends until all N tasks have finished, in any order.
    ///
    /// Callable from any number of tasks concurrently; returns
    /// immediately if the workload already completed. Raises the full
    /// list of recorded failures, if any.
    pub async fn wait_until_complete(&self) -> Result<(), WorkloadError> {
        let mut rx = self.state.done_rx.clone();
        while !*rx.borrow_and_update() {
            // the sender lives inside our own state, so `changed` cannot
            // fail while `self` is alive
            if rx.changed().await.is_err() {
                break;
            }
        }

        let failures = self.state.failures.lock().clone();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WorkloadError::TasksFailed {
                job: self.state.job_name.clone(),
                failures,
            })
        }
    }
}

impl fmt::Debug for WorkloadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadScheduler")
            .field("job_name", &self.state.job_name)
            .field("iterations", &self.state.iterations)
            .field("completed", &self.completed())
            .field("is_complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
