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

//! Task execution primitives.
//!
//! Two pieces compose here: [`WorkerPool`] bounds how many tasks run at
//! once, and [`WorkloadScheduler`] runs a fixed-size batch of indexed
//! tasks on a pool while tracking their joint completion.
//!
//! The loading service owns two pools (datasource fan-out and block
//! fan-out) and builds one scheduler per job on top of them.

pub mod pool;
pub mod workload;

pub use pool::{PoolClosed, PoolShutdownSummary, WorkerPool};
pub use workload::{TaskFailure, WorkloadError, WorkloadScheduler};
