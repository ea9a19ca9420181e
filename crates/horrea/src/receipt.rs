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

//! Receipts: handles to asynchronous loading jobs.
//!
//! Every load or update operation hands the caller a [`Receipt`] before
//! any work runs. The receipt carries identity and timestamps plus a
//! [`ReceiptKind`] that determines how completion is tracked:
//!
//! - [`ReceiptKind::Single`] wraps one workload scheduler and completes
//!   when the scheduler does.
//! - [`ReceiptKind::Composite`] aggregates child receipts appended by the
//!   scheduling logic until it is sealed; it is complete only once it is
//!   sealed **and** every child is complete.
//! - [`ReceiptKind::Failed`] records a job that never got scheduled; its
//!   wait raises immediately.
//!
//! Sealing is a one-way, exactly-once transition. Appending a child to a
//! sealed composite, or sealing twice, is a fatal usage error and panics
//! rather than being silently ignored.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::LoadError;
use crate::executor::WorkloadScheduler;

/// What kind of operation a receipt tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    /// Loading every registered datasource.
    All,
    /// Loading one datasource.
    Datasource,
    /// Loading or updating a supplied item collection.
    DataItems,
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadType::All => "load_all",
            LoadType::Datasource => "load_datasource",
            LoadType::DataItems => "load_data_items",
        };
        write!(f, "{}", name)
    }
}

/// Point-in-time status projection of a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Accepted, no work observed yet.
    Submitted,
    /// Work has started and is not yet finished.
    Running,
    /// All work finished without recorded failures.
    Completed,
    /// The job failed to schedule, or finished with recorded failures.
    Failed,
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiptStatus::Submitted => "submitted",
            ReceiptStatus::Running => "running",
            ReceiptStatus::Completed => "completed",
            ReceiptStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A child failure recorded by a composite receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFailure {
    /// ID of the child receipt that failed.
    pub receipt_id: u64,
    /// The child's failure rendered as a message.
    pub error: String,
}

/// Serializable projection of a receipt, for REST-style consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub id: u64,
    pub datasource: String,
    pub load_type: LoadType,
    pub status: ReceiptStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct CompositeInner {
    children: Vec<Arc<Receipt>>,
    sealed: bool,
    captured: Vec<CapturedFailure>,
}

/// Shared state of a composite receipt.
///
/// The child list and the sealed flag live under one mutex; sealing is
/// additionally broadcast on a one-shot watch channel so that waiters can
/// suspend without polling.
pub struct CompositeState {
    rethrow: bool,
    inner: Mutex<CompositeInner>,
    sealed_tx: watch::Sender<bool>,
    sealed_rx: watch::Receiver<bool>,
}

impl fmt::Debug for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CompositeState")
            .field("rethrow", &self.rethrow)
            .field("sealed", &inner.sealed)
            .field("children", &inner.children.len())
            .field("captured", &inner.captured.len())
            .finish()
    }
}

/// Completion-tracking behavior of a receipt.
#[derive(Debug)]
pub enum ReceiptKind {
    /// Tracks one workload scheduler.
    Single { scheduler: Arc<WorkloadScheduler> },
    /// Aggregates child receipts until sealed.
    Composite { state: CompositeState },
    /// A job that never got scheduled.
    Failed { message: String },
}

impl ReceiptKind {
    /// Kind for a receipt tracking one scheduler.
    pub fn single(scheduler: Arc<WorkloadScheduler>) -> Self {
        ReceiptKind::Single { scheduler }
    }

    /// Kind for a composite receipt. `rethrow` controls whether the first
    /// child failure is raised from the wait or merely recorded.
    pub fn composite(rethrow: bool) -> Self {
        let (sealed_tx, sealed_rx) = watch::channel(false);
        ReceiptKind::Composite {
            state: CompositeState {
                rethrow,
                inner: Mutex::new(CompositeInner {
                    children: Vec::new(),
                    sealed: false,
                    captured: Vec::new(),
                }),
                sealed_tx,
                sealed_rx,
            },
        }
    }

    /// Kind for a job that failed before any task was submitted.
    pub fn failed(message: impl Into<String>) -> Self {
        ReceiptKind::Failed {
            message: message.into(),
        }
    }
}

/// A handle to an asynchronous loading job.
///
/// Receipts are created and registered when a job is accepted, before any
/// work is dispatched, and are shared as `Arc<Receipt>` between the
/// registry, the scheduling logic, and the caller.
#[derive(Debug)]
pub struct Receipt {
    id: u64,
    datasource: String,
    load_type: LoadType,
    submitted_at: DateTime<Utc>,
    completed_at: OnceCell<DateTime<Utc>>,
    kind: ReceiptKind,
}

impl Receipt {
    pub(crate) fn new(
        id: u64,
        datasource: impl Into<String>,
        load_type: LoadType,
        kind: ReceiptKind,
    ) -> Self {
        Self {
            id,
            datasource: datasource.into(),
            load_type,
            submitted_at: Utc::now(),
            completed_at: OnceCell::new(),
            kind,
        }
    }

    /// Unique, monotonically increasing receipt ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the datasource (or dataset) this receipt tracks.
    pub fn datasource_name(&self) -> &str {
        &self.datasource
    }

    /// What kind of operation this receipt tracks.
    pub fn load_type(&self) -> LoadType {
        self.load_type
    }

    /// When the job was accepted.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// When a terminal wait first returned, if one has.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.get().copied()
    }

    /// Appends a child receipt to this composite.
    ///
    /// # Panics
    ///
    /// Panics if this receipt is not a composite, or if the composite has
    /// already been sealed.
    pub fn add_child(&self, child: Arc<Receipt>) {
        match &self.kind {
            ReceiptKind::Composite { state } => {
                let mut inner = state.inner.lock();
                if inner.sealed {
                    panic!(
                        "cannot add child receipt: composite receipt {} is already sealed",
                        self.id
                    );
                }
                debug!(
                    receipt_id = self.id,
                    child_id = child.id,
                    "adding child receipt to composite"
                );
                inner.children.push(child);
            }
            _ => panic!("receipt {} is not a composite", self.id),
        }
    }

    /// Seals this composite: no more children will be added, and waiters
    /// may now complete once every child has.
    ///
    /// # Panics
    ///
    /// Panics if this receipt is not a composite, or on a second seal.
    pub fn seal(&self) {
        if !self.seal_if_unsealed() {
            panic!("composite receipt {} is already sealed", self.id);
        }
    }

    /// Seals this composite if nobody has yet, returning whether this
    /// call did the sealing. Used by scheduling logic where a competing
    /// seal is expected rather than a usage error.
    ///
    /// # Panics
    ///
    /// Panics if this receipt is not a composite.
    pub(crate) fn seal_if_unsealed(&self) -> bool {
        match &self.kind {
            ReceiptKind::Composite { state } => {
                let mut inner = state.inner.lock();
                if inner.sealed {
                    return false;
                }
                inner.sealed = true;
                debug!(
                    receipt_id = self.id,
                    children = inner.children.len(),
                    "sealing composite receipt"
                );
                drop(inner);
                let _ = state.sealed_tx.send(true);
                true
            }
            _ => panic!("receipt {} is not a composite", self.id),
        }
    }

    /// Snapshot of a composite's child receipts so far. Empty for other
    /// kinds.
    pub fn children(&self) -> Vec<Arc<Receipt>> {
        match &self.kind {
            ReceiptKind::Composite { state } => state.inner.lock().children.clone(),
            _ => Vec::new(),
        }
    }

    /// Child failures recorded by a composite's waits. Empty for other
    /// kinds.
    pub fn captured_failures(&self) -> Vec<CapturedFailure> {
        match &self.kind {
            ReceiptKind::Composite { state } => state.inner.lock().captured.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether the tracked job has finished, successfully or not.
    ///
    /// A composite is complete only once it is sealed and every child is
    /// complete.
    pub fn is_complete(&self) -> bool {
        match &self.kind {
            ReceiptKind::Failed { .. } => true,
            ReceiptKind::Single { scheduler } => scheduler.is_complete(),
            ReceiptKind::Composite { state } => {
                let inner = state.inner.lock();
                inner.sealed && inner.children.iter().all(|child| child.is_complete())
            }
        }
    }

    /// Whether any failure has been observed for this receipt's job.
    pub fn has_failures(&self) -> bool {
        match &self.kind {
            ReceiptKind::Failed { .. } => true,
            ReceiptKind::Single { scheduler } => scheduler.failure_count() > 0,
            ReceiptKind::Composite { state } => {
                let inner = state.inner.lock();
                !inner.captured.is_empty()
                    || inner.children.iter().any(|child| child.has_failures())
            }
        }
    }

    fn work_started(&self) -> bool {
        match &self.kind {
            ReceiptKind::Failed { .. } => true,
            ReceiptKind::Single { scheduler } => scheduler.has_started(),
            ReceiptKind::Composite { state } => {
                let inner = state.inner.lock();
                inner.sealed || !inner.children.is_empty()
            }
        }
    }

    /// Point-in-time status projection.
    pub fn status(&self) -> ReceiptStatus {
        if matches!(self.kind, ReceiptKind::Failed { .. }) {
            return ReceiptStatus::Failed;
        }
        if self.is_complete() {
            if self.has_failures() {
                ReceiptStatus::Failed
            } else {
                ReceiptStatus::Completed
            }
        } else if self.work_started() {
            ReceiptStatus::Running
        } else {
            ReceiptStatus::Submitted
        }
    }

    /// Serializable projection of this receipt.
    pub fn summary(&self) -> ReceiptSummary {
        ReceiptSummary {
            id: self.id,
            datasource: self.datasource.clone(),
            load_type: self.load_type,
            status: self.status(),
            submitted_at: self.submitted_at,
            completed_at: self.completed_at(),
        }
    }

    /// Suspends until the tracked job has finished.
    ///
    /// - Single: waits for the scheduler and raises its aggregated task
    ///   failures, if any.
    /// - Composite: waits until sealed, then waits for every child. In
    ///   rethrow mode the first child failure is recorded and raised
    ///   immediately; otherwise failures are recorded and the wait
    ///   returns normally once every child has finished. Repeated calls
    ///   re-check every child.
    /// - Failed: raises the captured scheduling error immediately.
    pub async fn wait_until_completion(&self) -> Result<(), LoadError> {
        match &self.kind {
            ReceiptKind::Failed { message } => {
                self.completed_at.get_or_init(Utc::now);
                Err(LoadError::SchedulingFailed {
                    datasource: self.datasource.clone(),
                    message: message.clone(),
                })
            }
            ReceiptKind::Single { scheduler } => {
                let result = scheduler.wait_until_complete().await;
                self.completed_at.get_or_init(Utc::now);
                debug!(
                    receipt_id = self.id,
                    datasource = %self.datasource,
                    "single workload receipt complete"
                );
                result.map_err(LoadError::from)
            }
            ReceiptKind::Composite { state } => {
                let mut rx = state.sealed_rx.clone();
                while !*rx.borrow_and_update() {
                    // the sender lives inside this receipt's own state
                    if rx.changed().await.is_err() {
                        break;
                    }
                }

                // sealed: the child list can no longer change
                let children: Vec<Arc<Receipt>> = state.inner.lock().children.clone();
                debug!(
                    receipt_id = self.id,
                    children = children.len(),
                    "composite sealed; waiting for child receipts"
                );

                for child in &children {
                    if let Err(e) = Box::pin(child.wait_until_completion()).await {
                        let mut inner = state.inner.lock();
                        if !inner.captured.iter().any(|c| c.receipt_id == child.id) {
                            inner.captured.push(CapturedFailure {
                                receipt_id: child.id,
                                error: e.to_string(),
                            });
                        }
                        drop(inner);
                        if state.rethrow {
                            return Err(e);
                        }
                    }
                }

                self.completed_at.get_or_init(Utc::now);
                debug!(receipt_id = self.id, "all child receipts complete");
                Ok(())
            }
        }
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Receipt {{ id = {}, datasource = '{}', load_type = {}, status = {} }}",
            self.id,
            self.datasource,
            self.load_type,
            self.status()
        )
    }
}
