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

//! Block partitioning arithmetic.
//!
//! Every load and update operation divides its item count into
//! fixed-size blocks with the same formula: iteration `i` (1-based) covers
//! the half-open item range starting at `(i - 1) * block_size`. An
//! optional global cap truncates both the number of iterations and the
//! final block.

/// A partitioning of `min(cap, count)` items into fixed-size blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    total: usize,
    block_size: usize,
}

impl BlockPlan {
    /// Plans a load of `count` items in blocks of `block_size`, capped at
    /// `max_items` when the cap is non-zero and smaller than the count.
    pub fn new(count: usize, block_size: usize, max_items: usize) -> Self {
        // a zero block size would divide by zero below
        let block_size = block_size.max(1);
        let total = if max_items > 0 && max_items < count {
            max_items
        } else {
            count
        };
        Self { total, block_size }
    }

    /// Number of items this plan will actually read.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of block iterations required to cover the total.
    pub fn iterations(&self) -> usize {
        self.total / self.block_size + usize::from(self.total % self.block_size > 0)
    }

    /// The `(offset, limit)` pair for iteration `i` in `[1..=iterations]`.
    ///
    /// The final block's limit is truncated so that at most
    /// [`total`](Self::total) items are covered overall. Out-of-range
    /// iterations yield a zero limit.
    pub fn block_range(&self, iteration: usize) -> (usize, usize) {
        let offset = (iteration - 1) * self.block_size;
        let limit = self.block_size.min(self.total.saturating_sub(offset));
        (offset, limit)
    }
}
