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

//! The persistence adapter seam.
//!
//! A [`Persister`] receives the blocks read by loading tasks and writes
//! them to the central store. Persistence is assumed idempotent at this
//! boundary: a block may be delivered more than once across retries and
//! the store must tolerate that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by persistence adapters.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The adapter does not implement this operation.
    #[error("persister does not support {operation}")]
    Unsupported { operation: &'static str },

    /// The operation is supported but failed.
    #[error("persist operation failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl PersistError {
    /// Shorthand for declaring an operation unsupported.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}

/// Describes an update to apply to a collection of items.
///
/// The loading service passes descriptors through to the persister
/// untouched; the `params` payload is whatever the persister
/// implementation understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    name: String,
    params: serde_json::Value,
}

impl UpdateDescriptor {
    /// Creates a descriptor with the given operation name and no
    /// parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Attaches a parameter payload.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// The update operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameter payload.
    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }
}

/// Writes loaded items into the central store.
#[async_trait]
pub trait Persister<T>: Send + Sync {
    /// Persists one block of items read from the named datasource.
    async fn persist(&self, datasource: &str, items: Vec<T>) -> Result<(), PersistError>;

    /// Persists a datasource's supplementary bulk artifact.
    async fn persist_supplementary(
        &self,
        datasource: &str,
        data: Vec<u8>,
    ) -> Result<(), PersistError> {
        let _ = (datasource, data);
        Err(PersistError::unsupported("persist_supplementary"))
    }

    /// Applies an update to one block of items.
    async fn update(&self, items: Vec<T>, update: &UpdateDescriptor) -> Result<(), PersistError>
    where
        T: Send + 'async_trait,
    {
        let _ = (items, update);
        Err(PersistError::unsupported("update"))
    }
}
