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

//! The datasource adapter seam.
//!
//! A [`Datasource`] is a named, external provider of bulk items. Adapters
//! may support random-access reads (`count` + `read_block`), a single
//! unbounded read, or both; any capability they lack is reported as
//! [`SourceError::Unsupported`] and the loading service degrades
//! gracefully instead of failing the job.

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by datasource adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The adapter does not implement this operation. The loading service
    /// treats this as "nothing to load" for the affected path, not as a
    /// job failure.
    #[error("datasource does not support {operation}")]
    Unsupported { operation: &'static str },

    /// The operation is supported but failed.
    #[error("datasource read failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl SourceError {
    /// Shorthand for declaring an operation unsupported.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}

/// A named provider of bulk items.
///
/// The loading service pulls items in bounded blocks when the adapter can
/// count and seek, and falls back to one unbounded read when it cannot.
/// Adapters that also carry a supplementary bulk artifact (for example a
/// pre-rendered export alongside the records themselves) opt in through
/// [`has_supplementary`](Datasource::has_supplementary); the artifact is
/// fetched once per datasource job.
///
/// ```rust,ignore
/// struct CsvSource { path: PathBuf }
///
/// #[async_trait]
/// impl Datasource<Record> for CsvSource {
///     fn name(&self) -> &str {
///         "csv-export"
///     }
///
///     async fn count(&self) -> Result<usize, SourceError> {
///         Err(SourceError::unsupported("count"))
///     }
///
///     async fn read_block(&self, _limit: usize, _offset: usize) -> Result<Vec<Record>, SourceError> {
///         Err(SourceError::unsupported("read_block"))
///     }
///
///     async fn read_all(&self) -> Result<Vec<Record>, SourceError> {
///         Ok(parse_csv(&self.path).await?)
///     }
/// }
/// ```
#[async_trait]
pub trait Datasource<T>: Send + Sync {
    /// Stable, human-readable name of this datasource. Used for receipt
    /// labeling and log output.
    fn name(&self) -> &str;

    /// Total number of items available, if the adapter can tell.
    async fn count(&self) -> Result<usize, SourceError>;

    /// Reads up to `limit` items starting at `offset`.
    async fn read_block(&self, limit: usize, offset: usize) -> Result<Vec<T>, SourceError>;

    /// Reads every available item in one call. Only used when `count` is
    /// unsupported.
    async fn read_all(&self) -> Result<Vec<T>, SourceError>;

    /// Whether this datasource carries a supplementary bulk artifact.
    fn has_supplementary(&self) -> bool {
        false
    }

    /// Fetches the supplementary bulk artifact.
    async fn read_supplementary(&self) -> Result<Vec<u8>, SourceError> {
        Err(SourceError::unsupported("read_supplementary"))
    }
}
