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

//! Configuration types for the loading service.
//!
//! This module contains the configuration struct and builder that control
//! pool sizing, block partitioning, and shutdown behavior.

use std::time::Duration;

/// Configuration for a [`LoadingService`](crate::service::LoadingService).
///
/// Controls the two worker pool sizes, how collections are partitioned into
/// blocks, the optional global item cap, and shutdown behavior.
///
/// # Construction
///
/// Use [`LoaderConfig::builder()`] to create a configuration:
///
/// ```rust
/// use horrea::config::LoaderConfig;
///
/// let config = LoaderConfig::builder()
///     .source_concurrency(8)
///     .block_size(50_000)
///     .build();
/// assert_eq!(config.source_concurrency(), 8);
/// ```
///
/// Or use the default configuration:
///
/// ```rust
/// use horrea::config::LoaderConfig;
///
/// let config = LoaderConfig::default();
/// assert_eq!(config.block_concurrency(), 32);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LoaderConfig {
    source_concurrency: usize,
    block_concurrency: usize,
    block_size: usize,
    max_items: usize,
    shutdown_grace: Duration,
    rethrow_child_failures: bool,
}

impl LoaderConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Maximum number of datasource-level jobs running concurrently.
    pub fn source_concurrency(&self) -> usize {
        self.source_concurrency
    }

    /// Maximum number of block-level tasks running concurrently.
    pub fn block_concurrency(&self) -> usize {
        self.block_concurrency
    }

    /// Number of items read and persisted per block task.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Global cap on items loaded per job; 0 means unlimited.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// How long in-flight tasks get to finish during shutdown before they
    /// are aborted.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Whether a composite receipt rethrows the first child failure from
    /// its wait, or records failures for later retrieval.
    pub fn rethrow_child_failures(&self) -> bool {
        self.rethrow_child_failures
    }
}

/// Builder for [`LoaderConfig`].
///
/// ```rust
/// use std::time::Duration;
/// use horrea::config::LoaderConfig;
///
/// let config = LoaderConfig::builder()
///     .block_concurrency(16)
///     .max_items(1_000_000)
///     .shutdown_grace(Duration::from_secs(10))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl Default for LoaderConfigBuilder {
    fn default() -> Self {
        Self {
            config: LoaderConfig {
                source_concurrency: 4,
                block_concurrency: 32,
                block_size: 100_000,
                max_items: 0,
                shutdown_grace: Duration::from_secs(30),
                rethrow_child_failures: true,
            },
        }
    }
}

impl LoaderConfigBuilder {
    /// Sets the datasource-level pool concurrency.
    pub fn source_concurrency(mut self, value: usize) -> Self {
        self.config.source_concurrency = value;
        self
    }

    /// Sets the block-level pool concurrency.
    pub fn block_concurrency(mut self, value: usize) -> Self {
        self.config.block_concurrency = value;
        self
    }

    /// Sets the number of items per block.
    pub fn block_size(mut self, value: usize) -> Self {
        self.config.block_size = value;
        self
    }

    /// Sets the global item cap (0 = unlimited).
    pub fn max_items(mut self, value: usize) -> Self {
        self.config.max_items = value;
        self
    }

    /// Sets the shutdown grace period.
    pub fn shutdown_grace(mut self, value: Duration) -> Self {
        self.config.shutdown_grace = value;
        self
    }

    /// Enables or disables rethrowing the first child failure from a
    /// composite receipt's wait.
    pub fn rethrow_child_failures(mut self, value: bool) -> Self {
        self.config.rethrow_child_failures = value;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfigBuilder::default().build()
    }
}
