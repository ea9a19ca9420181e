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

//! The loading service: the top-level orchestrator of bulk loads.
//!
//! A [`LoadingService`] owns two independently bounded worker pools. The
//! datasource pool runs one task per registered datasource when loading
//! everything, so one oversized datasource cannot starve its siblings.
//! The block pool runs one task per bounded chunk of items inside a
//! single datasource's job, capping how many read cursors are open at
//! once regardless of how many datasources exist.
//!
//! Every operation registers a receipt before dispatching any work and
//! returns it without waiting. Callers block on the receipt, or poll its
//! status through the service's registry.
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use horrea::{LoaderConfig, LoadingService};
//!
//! let config = LoaderConfig::builder()
//!     .source_concurrency(8)
//!     .block_size(50_000)
//!     .build();
//! let service = LoadingService::with_config(config, Arc::new(my_persister));
//! service.register_source(Arc::new(my_datasource));
//!
//! let receipt = service.load_all().await?;
//! receipt.wait_until_completion().await?;
//! service.shutdown().await;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::context::{AmbientContext, ContextGuard, NoopAmbientContext};
use crate::error::LoadError;
use crate::executor::{WorkerPool, WorkloadScheduler};
use crate::plan::BlockPlan;
use crate::receipt::{LoadType, Receipt, ReceiptKind, ReceiptStatus};
use crate::registry::ReceiptRegistry;
use crate::sink::{PersistError, Persister, UpdateDescriptor};
use crate::source::{Datasource, SourceError};

/// Lifecycle state of a loading service, derived from its pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Both pools accept new jobs.
    Running,
    /// Shutdown has begun; in-flight tasks may still be draining.
    ShuttingDown,
    /// Both pools have stopped accepting and drained.
    ShutDown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Running => "running",
            ServiceStatus::ShuttingDown => "shutting down",
            ServiceStatus::ShutDown => "shut down",
        };
        write!(f, "{}", name)
    }
}

struct ServiceInner<T> {
    config: LoaderConfig,
    source_pool: Arc<WorkerPool>,
    block_pool: Arc<WorkerPool>,
    registry: ReceiptRegistry,
    persister: Arc<dyn Persister<T>>,
    context: RwLock<Arc<dyn AmbientContext>>,
    sources: RwLock<Vec<Arc<dyn Datasource<T>>>>,
    instance_id: Uuid,
}

impl<T> Drop for ServiceInner<T> {
    fn drop(&mut self) {
        if self.source_pool.is_accepting() || self.block_pool.is_accepting() {
            debug!(
                instance_id = %self.instance_id,
                "loading service dropped without shutdown"
            );
        }
    }
}

/// Orchestrates concurrent bulk loads across registered datasources.
///
/// Cloning the service is cheap and every clone shares the same pools,
/// registry, and datasource set.
pub struct LoadingService<T> {
    inner: Arc<ServiceInner<T>>,
}

impl<T> Clone for LoadingService<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for LoadingService<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingService")
            .field("instance_id", &self.inner.instance_id)
            .field("status", &self.status())
            .field("sources", &self.inner.sources.read().len())
            .field("receipts", &self.inner.registry.len())
            .finish()
    }
}

impl<T> LoadingService<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a service with default configuration.
    pub fn new(persister: Arc<dyn Persister<T>>) -> Self {
        Self::with_config(LoaderConfig::default(), persister)
    }

    /// Creates a service with the given configuration.
    pub fn with_config(config: LoaderConfig, persister: Arc<dyn Persister<T>>) -> Self {
        let instance_id = Uuid::new_v4();
        info!(
            instance_id = %instance_id,
            source_concurrency = config.source_concurrency(),
            block_concurrency = config.block_concurrency(),
            block_size = config.block_size(),
            max_items = config.max_items(),
            "creating loading service"
        );
        let source_pool = Arc::new(WorkerPool::new(
            "datasource-fan-out",
            config.source_concurrency(),
        ));
        let block_pool = Arc::new(WorkerPool::new("block-fan-out", config.block_concurrency()));
        Self {
            inner: Arc::new(ServiceInner {
                config,
                source_pool,
                block_pool,
                registry: ReceiptRegistry::new(),
                persister,
                context: RwLock::new(Arc::new(NoopAmbientContext)),
                sources: RwLock::new(Vec::new()),
                instance_id,
            }),
        }
    }

    /// Replaces the ambient-context provider. Captures for jobs scheduled
    /// afterwards use the new provider; already-running tasks keep the
    /// one they captured.
    pub fn set_ambient_context(&self, provider: Arc<dyn AmbientContext>) {
        *self.inner.context.write() = provider;
    }

    /// Adds a datasource to the set covered by [`load_all`].
    ///
    /// [`load_all`]: LoadingService::load_all
    pub fn register_source(&self, source: Arc<dyn Datasource<T>>) {
        debug!(datasource = source.name(), "registering datasource");
        self.inner.sources.write().push(source);
    }

    /// Snapshot of the registered datasources.
    pub fn sources(&self) -> Vec<Arc<dyn Datasource<T>>> {
        self.inner.sources.read().clone()
    }

    /// This service's configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Unique ID of this service instance, for log correlation.
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    /// The receipt registry, for lookups by receipt ID.
    pub fn registry(&self) -> &ReceiptRegistry {
        &self.inner.registry
    }

    /// Current status of the receipt with this ID, if it exists.
    pub fn receipt_status(&self, id: u64) -> Option<ReceiptStatus> {
        self.inner.registry.status_of(id)
    }

    /// Lifecycle state derived from the two pools.
    pub fn status(&self) -> ServiceStatus {
        let source_pool = &self.inner.source_pool;
        let block_pool = &self.inner.block_pool;
        if source_pool.is_accepting() && block_pool.is_accepting() {
            ServiceStatus::Running
        } else if source_pool.is_terminated() && block_pool.is_terminated() {
            ServiceStatus::ShutDown
        } else {
            ServiceStatus::ShuttingDown
        }
    }

    /// Schedules a load of every registered datasource and returns a
    /// composite receipt tracking all of them.
    ///
    /// One fan-out task per datasource runs on the datasource pool; each
    /// schedules that datasource's block workload and appends the child
    /// receipt to the composite. Whichever fan-out task records the final
    /// scheduling attempt seals the composite, so waiters can never see
    /// it complete with children still missing.
    pub async fn load_all(&self) -> Result<Arc<Receipt>, LoadError> {
        if !self.inner.source_pool.is_accepting() {
            return Err(LoadError::ShutDown {
                operation: "load datasources",
            });
        }

        // registration can race enumeration, so fan out over a snapshot
        let sources = self.inner.sources.read().clone();
        if sources.is_empty() {
            return Err(LoadError::NoSources);
        }
        let count = sources.len();

        let composite = self.inner.registry.register(
            "all-datasources",
            LoadType::All,
            ReceiptKind::composite(self.inner.config.rethrow_child_failures()),
        );

        let provider = self.inner.context.read().clone();
        let token = provider.capture();
        let scheduled = Arc::new(AtomicUsize::new(0));
        let sources = Arc::new(sources);
        let inner = self.inner.clone();
        let composite_for_tasks = composite.clone();

        let scheduler = Arc::new(WorkloadScheduler::new(
            self.inner.source_pool.clone(),
            count,
            "load-all-datasources",
            move |iteration| {
                let inner = inner.clone();
                let provider = provider.clone();
                let token = token.clone();
                let composite = composite_for_tasks.clone();
                let scheduled = scheduled.clone();
                let sources = sources.clone();
                async move {
                    let _guard = ContextGuard::install(provider.as_ref(), &token);
                    let source = sources[iteration - 1].clone();
                    let child = inner.schedule_source_load(source).await;
                    composite.add_child(child);
                    if scheduled.fetch_add(1, Ordering::SeqCst) + 1 == count {
                        composite.seal_if_unsealed();
                    }
                    Ok(())
                }
            },
        ));

        // a fan-out task dropped or aborted during shutdown never reaches
        // its seal attempt, so seal on scheduler completion as well
        let watched_scheduler = scheduler.clone();
        let watched_composite = composite.clone();
        tokio::spawn(async move {
            let _ = watched_scheduler.wait_until_complete().await;
            watched_composite.seal_if_unsealed();
        });

        info!(datasources = count, "scheduling load of all datasources");
        scheduler.start();
        Ok(composite)
    }

    /// Schedules a load of one datasource and returns its receipt.
    ///
    /// The datasource does not need to be registered on this service.
    pub async fn load_one(
        &self,
        source: Arc<dyn Datasource<T>>,
    ) -> Result<Arc<Receipt>, LoadError> {
        if !self.inner.block_pool.is_accepting() {
            return Err(LoadError::ShutDown {
                operation: "load a datasource",
            });
        }
        Ok(self.inner.schedule_source_load(source).await)
    }

    /// Schedules a load of an in-memory item collection under a generated
    /// dataset name.
    pub async fn load_items(&self, items: Vec<T>) -> Result<Arc<Receipt>, LoadError> {
        let name = format!("dataset-{}", Uuid::new_v4());
        self.load_items_named(items, name).await
    }

    /// Schedules a load of an in-memory item collection under the given
    /// dataset name. The collection is partitioned into blocks exactly
    /// like a datasource of the same size.
    pub async fn load_items_named(
        &self,
        items: Vec<T>,
        dataset_name: impl Into<String>,
    ) -> Result<Arc<Receipt>, LoadError> {
        if !self.inner.block_pool.is_accepting() {
            return Err(LoadError::ShutDown {
                operation: "load data items",
            });
        }

        let dataset = Arc::new(dataset_name.into());
        let plan = BlockPlan::new(
            items.len(),
            self.inner.config.block_size(),
            self.inner.config.max_items(),
        );
        let items = Arc::new(items);
        let provider = self.inner.context.read().clone();
        let token = provider.capture();
        let persister = self.inner.persister.clone();
        let dataset_for_tasks = dataset.clone();

        let scheduler = Arc::new(WorkloadScheduler::new(
            self.inner.block_pool.clone(),
            plan.iterations(),
            format!("load-{}", dataset),
            move |iteration| {
                let items = items.clone();
                let persister = persister.clone();
                let provider = provider.clone();
                let token = token.clone();
                let dataset = dataset_for_tasks.clone();
                async move {
                    let _guard = ContextGuard::install(provider.as_ref(), &token);
                    let (offset, limit) = plan.block_range(iteration);
                    let chunk = items[offset..offset + limit].to_vec();
                    persist_block(persister.as_ref(), &dataset, iteration, chunk).await
                }
            },
        ));

        let receipt = self.inner.registry.register(
            dataset.as_str(),
            LoadType::DataItems,
            ReceiptKind::single(scheduler.clone()),
        );
        info!(
            dataset = %dataset,
            items = plan.total(),
            blocks = plan.iterations(),
            "scheduling data item load"
        );
        scheduler.start();
        Ok(receipt)
    }

    /// Schedules an update pass over an in-memory item collection,
    /// applying the given descriptor to each block.
    pub async fn update_items(
        &self,
        items: Vec<T>,
        update: UpdateDescriptor,
    ) -> Result<Arc<Receipt>, LoadError> {
        if !self.inner.block_pool.is_accepting() {
            return Err(LoadError::ShutDown {
                operation: "update data items",
            });
        }

        let job = format!("update-{}", update.name());
        let update = Arc::new(update);
        let plan = BlockPlan::new(
            items.len(),
            self.inner.config.block_size(),
            self.inner.config.max_items(),
        );
        let items = Arc::new(items);
        let provider = self.inner.context.read().clone();
        let token = provider.capture();
        let persister = self.inner.persister.clone();
        let update_for_tasks = update.clone();

        let scheduler = Arc::new(WorkloadScheduler::new(
            self.inner.block_pool.clone(),
            plan.iterations(),
            job.clone(),
            move |iteration| {
                let items = items.clone();
                let persister = persister.clone();
                let provider = provider.clone();
                let token = token.clone();
                let update = update_for_tasks.clone();
                async move {
                    let _guard = ContextGuard::install(provider.as_ref(), &token);
                    let (offset, limit) = plan.block_range(iteration);
                    let chunk = items[offset..offset + limit].to_vec();
                    match persister.update(chunk, &update).await {
                        Ok(()) => {
                            debug!(update = update.name(), iteration, items = limit, "applied update block");
                            Ok(())
                        }
                        Err(PersistError::Unsupported { operation }) => {
                            warn!(
                                update = update.name(),
                                operation, "persister does not support updates; block skipped"
                            );
                            Ok(())
                        }
                        Err(PersistError::Failed(e)) => Err(e.context(format!(
                            "applying update '{}' to block {}",
                            update.name(),
                            iteration
                        ))),
                    }
                }
            },
        ));

        let receipt = self.inner.registry.register(
            job.as_str(),
            LoadType::DataItems,
            ReceiptKind::single(scheduler.clone()),
        );
        info!(
            update = update.name(),
            items = plan.total(),
            blocks = plan.iterations(),
            "scheduling data item update"
        );
        scheduler.start();
        Ok(receipt)
    }

    /// Stops accepting new jobs, drains in-flight tasks within the
    /// configured grace period, and aborts whatever remains after it.
    ///
    /// Idempotent; a second call observes already-closed pools.
    pub async fn shutdown(&self) {
        info!(
            instance_id = %self.inner.instance_id,
            "shutting down loading service"
        );
        let grace = self.inner.config.shutdown_grace();
        let source_summary = self.inner.source_pool.shutdown(grace).await;
        let block_summary = self.inner.block_pool.shutdown(grace).await;
        info!(
            instance_id = %self.inner.instance_id,
            dropped = source_summary.dropped + block_summary.dropped,
            aborted = source_summary.aborted + block_summary.aborted,
            "loading service shut down"
        );
    }
}

impl<T> ServiceInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Plans and starts the block workload for one datasource. Never
    /// fails: a scheduling-time error is returned as a receipt whose
    /// wait raises it.
    async fn schedule_source_load(&self, source: Arc<dyn Datasource<T>>) -> Arc<Receipt> {
        let (plan, blocks) = match source.count().await {
            Ok(count) => {
                let plan = BlockPlan::new(count, self.config.block_size(), self.config.max_items());
                (Some(plan), plan.iterations())
            }
            Err(SourceError::Unsupported { operation }) => {
                warn!(
                    datasource = source.name(),
                    operation, "datasource cannot count items; falling back to one unbounded read"
                );
                (None, 1)
            }
            Err(SourceError::Failed(e)) => {
                error!(
                    datasource = source.name(),
                    error = %e,
                    "scheduling datasource load failed"
                );
                return self.registry.register(
                    source.name(),
                    LoadType::Datasource,
                    ReceiptKind::failed(format!("item count failed: {}", e)),
                );
            }
        };

        // the supplementary artifact is loaded once per datasource job,
        // as one extra iteration after the block range
        let supplementary = source.has_supplementary();
        let task_count = blocks + usize::from(supplementary);

        let persister = self.persister.clone();
        let provider = self.context.read().clone();
        let token = provider.capture();
        let source_for_tasks = source.clone();

        let scheduler = Arc::new(WorkloadScheduler::new(
            self.block_pool.clone(),
            task_count,
            format!("load-{}", source.name()),
            move |iteration| {
                let source = source_for_tasks.clone();
                let persister = persister.clone();
                let provider = provider.clone();
                let token = token.clone();
                async move {
                    let _guard = ContextGuard::install(provider.as_ref(), &token);
                    if iteration <= blocks {
                        let read = match plan {
                            Some(plan) => {
                                let (offset, limit) = plan.block_range(iteration);
                                source.read_block(limit, offset).await
                            }
                            None => source.read_all().await,
                        };
                        match read {
                            Ok(items) => {
                                persist_block(persister.as_ref(), source.name(), iteration, items)
                                    .await
                            }
                            Err(SourceError::Unsupported { operation }) => {
                                warn!(
                                    datasource = source.name(),
                                    operation,
                                    "datasource does not support reads; nothing to load"
                                );
                                Ok(())
                            }
                            Err(SourceError::Failed(e)) => Err(e.context(format!(
                                "reading block {} of '{}'",
                                iteration,
                                source.name()
                            ))),
                        }
                    } else {
                        load_supplementary(source.as_ref(), persister.as_ref()).await
                    }
                }
            },
        ));

        let receipt = self.registry.register(
            source.name(),
            LoadType::Datasource,
            ReceiptKind::single(scheduler.clone()),
        );
        info!(
            datasource = source.name(),
            blocks, supplementary, "scheduling datasource load"
        );
        scheduler.start();
        receipt
    }
}

/// Persists one block of items, treating an unsupported persister as
/// "nothing to store" rather than a failure.
async fn persist_block<T>(
    persister: &dyn Persister<T>,
    datasource: &str,
    iteration: usize,
    items: Vec<T>,
) -> anyhow::Result<()> {
    let count = items.len();
    match persister.persist(datasource, items).await {
        Ok(()) => {
            debug!(datasource, iteration, items = count, "persisted block");
            Ok(())
        }
        Err(PersistError::Unsupported { operation }) => {
            warn!(
                datasource,
                operation, "persister does not support operation; block skipped"
            );
            Ok(())
        }
        Err(PersistError::Failed(e)) => Err(e.context(format!(
            "persisting block {} of '{}'",
            iteration, datasource
        ))),
    }
}

/// Reads and persists a datasource's supplementary artifact. Unsupported
/// on either side is logged and skipped.
async fn load_supplementary<T>(
    source: &dyn Datasource<T>,
    persister: &dyn Persister<T>,
) -> anyhow::Result<()> {
    let data = match source.read_supplementary().await {
        Ok(data) => data,
        Err(SourceError::Unsupported { operation }) => {
            warn!(
                datasource = source.name(),
                operation, "datasource has no supplementary artifact"
            );
            return Ok(());
        }
        Err(SourceError::Failed(e)) => {
            return Err(e.context(format!(
                "reading supplementary artifact of '{}'",
                source.name()
            )));
        }
    };
    let size = data.len();
    match persister.persist_supplementary(source.name(), data).await {
        Ok(()) => {
            debug!(
                datasource = source.name(),
                bytes = size,
                "persisted supplementary artifact"
            );
            Ok(())
        }
        Err(PersistError::Unsupported { operation }) => {
            warn!(
                datasource = source.name(),
                operation, "persister does not support supplementary artifacts"
            );
            Ok(())
        }
        Err(PersistError::Failed(e)) => Err(e.context(format!(
            "persisting supplementary artifact of '{}'",
            source.name()
        ))),
    }
}
