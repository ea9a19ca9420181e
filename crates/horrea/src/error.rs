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

//! Service-boundary errors.
//!
//! [`LoadError`] is what callers of the loading service and receipt waits
//! see. Job-level failures travel through receipts; the only errors an
//! entry point returns synchronously are the shutdown check and
//! `load_all`'s empty-datasource check.

use thiserror::Error;

use crate::executor::WorkloadError;

/// Errors surfaced by the loading service and by receipt waits.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// `load_all` was called with no registered datasources.
    #[error("no datasources registered, nothing to load")]
    NoSources,

    /// An operation was invoked after shutdown. Returned synchronously to
    /// that one caller; running jobs are unaffected.
    #[error("cannot {operation}: loading service has been shut down")]
    ShutDown { operation: &'static str },

    /// A job never got scheduled. Raised by a failed receipt's wait,
    /// immediately and without suspending.
    #[error("scheduling of '{datasource}' loading tasks failed: {message}")]
    SchedulingFailed { datasource: String, message: String },

    /// One or more tasks of a scheduled workload failed.
    #[error(transparent)]
    Workload(#[from] WorkloadError),
}
