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

//! # Horrea
//!
//! Horrea is a library for ingesting large volumes of records from many
//! independent bulk datasources into a central store, concurrently and
//! without blocking the caller. Every load returns a [`Receipt`] up
//! front; the work itself fans out across two bounded worker pools and
//! the receipt reports (or waits for) the outcome.
//!
//! ## Key Features
//!
//! - **Non-blocking entry points**: `load_all`, `load_one`, `load_items`,
//!   and `update_items` all return a receipt immediately
//! - **Two-tier bounded concurrency**: a datasource-level pool and a
//!   block-level pool, sized independently, so one huge datasource cannot
//!   starve its siblings and open read cursors stay capped
//! - **Receipt-based completion tracking**: single, composite, and failed
//!   receipts with exactly-once sealing of composites
//! - **Block partitioning**: items are read and persisted in bounded
//!   blocks, with an optional global item cap
//! - **Ambient context propagation**: caller identity captured at
//!   schedule time, installed around each task, cleared on every exit
//! - **Graceful shutdown**: in-flight tasks drain within a grace period;
//!   whatever remains is aborted and accounted for
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use horrea::{LoaderConfig, LoadingService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoaderConfig::builder()
//!         .source_concurrency(4)
//!         .block_concurrency(32)
//!         .block_size(100_000)
//!         .build();
//!
//!     let service = LoadingService::with_config(config, Arc::new(my_persister));
//!     service.register_source(Arc::new(annotations_source));
//!     service.register_source(Arc::new(lexicon_source));
//!
//!     let receipt = service.load_all().await?;
//!     println!("job {} submitted", receipt.id());
//!
//!     receipt.wait_until_completion().await?;
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The pieces compose bottom-up:
//!
//! - [`executor`]: [`WorkerPool`], a semaphore-bounded task pool, and
//!   [`WorkloadScheduler`], which runs exactly N indexed tasks on a pool
//!   and lets any number of callers wait for all of them
//! - [`plan`]: the block-partitioning arithmetic shared by every operation
//! - [`receipt`] and [`registry`]: job handles and their ID-keyed registry
//! - [`source`] and [`sink`]: the adapter seams for reading datasources
//!   and persisting items
//! - [`context`]: the ambient-context seam and its RAII install guard
//! - [`service`]: [`LoadingService`], which wires all of the above
//!   together

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod plan;
pub mod receipt;
pub mod registry;
pub mod service;
pub mod sink;
pub mod source;

pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use context::{AmbientContext, ContextGuard, ContextToken, NoopAmbientContext};
pub use error::LoadError;
pub use executor::{
    PoolClosed, PoolShutdownSummary, TaskFailure, WorkerPool, WorkloadError, WorkloadScheduler,
};
pub use plan::BlockPlan;
pub use receipt::{
    CapturedFailure, CompositeState, LoadType, Receipt, ReceiptKind, ReceiptStatus, ReceiptSummary,
};
pub use registry::ReceiptRegistry;
pub use service::{LoadingService, ServiceStatus};
pub use sink::{PersistError, Persister, UpdateDescriptor};
pub use source::{Datasource, SourceError};
