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

//! Receipt registry: allocation and lookup of receipts by ID.
//!
//! Each loading service owns one registry. The registry allocates receipt
//! IDs from a monotonically increasing counter starting at 1, so an ID
//! uniquely names a job for the lifetime of the service and can be handed
//! to out-of-process callers (for example over a REST status endpoint).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::receipt::{LoadType, Receipt, ReceiptKind, ReceiptStatus};

/// Allocates and tracks receipts for one loading service.
#[derive(Debug)]
pub struct ReceiptRegistry {
    next_id: AtomicU64,
    receipts: RwLock<HashMap<u64, Arc<Receipt>>>,
}

impl ReceiptRegistry {
    pub fn new() -> Self {
        Self {
            // IDs start at 1; 0 is never a valid receipt ID
            next_id: AtomicU64::new(1),
            receipts: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a receipt with the next free ID and tracks it.
    pub fn register(
        &self,
        datasource: impl Into<String>,
        load_type: LoadType,
        kind: ReceiptKind,
    ) -> Arc<Receipt> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let receipt = Arc::new(Receipt::new(id, datasource, load_type, kind));
        self.receipts.write().insert(id, receipt.clone());
        debug!(
            receipt_id = id,
            datasource = receipt.datasource_name(),
            load_type = %receipt.load_type(),
            "registered receipt"
        );
        receipt
    }

    /// Looks up a receipt by ID.
    pub fn get(&self, id: u64) -> Option<Arc<Receipt>> {
        self.receipts.read().get(&id).cloned()
    }

    /// Current status of the receipt with this ID, if it exists.
    pub fn status_of(&self, id: u64) -> Option<ReceiptStatus> {
        self.get(id).map(|receipt| receipt.status())
    }

    /// Number of tracked receipts.
    pub fn len(&self) -> usize {
        self.receipts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.read().is_empty()
    }

    /// Drops every receipt whose job has finished, returning how many
    /// were removed. Outstanding `Arc` handles stay valid.
    pub fn evict_completed(&self) -> usize {
        let mut receipts = self.receipts.write();
        let before = receipts.len();
        receipts.retain(|_, receipt| !receipt.is_complete());
        let evicted = before - receipts.len();
        if evicted > 0 {
            debug!(evicted, remaining = receipts.len(), "evicted completed receipts");
        }
        evicted
    }
}

impl Default for ReceiptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
