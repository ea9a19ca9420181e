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

//! Ambient context propagation onto worker tasks.
//!
//! Whatever identity or authorization state is active on the caller at
//! schedule time must be visible inside every task the caller's job spawns,
//! and must never leak from one job to another through a pooled worker.
//!
//! The service captures a [`ContextToken`] once per entry-point call and
//! moves a clone into each task closure. The task installs the token for
//! the duration of its body through a [`ContextGuard`], which clears the
//! provider on every exit path (success, error, or abort).
//!
//! What a token carries is up to the [`AmbientContext`] provider; the
//! loading service treats it as opaque. Services built without a provider
//! use [`NoopAmbientContext`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Provider of caller identity/authorization state.
///
/// Implementations decide what `capture` snapshots and what `install`/
/// `clear` mean (for example, binding a principal into a request-scoped
/// slot). All three operations are synchronous; they manipulate in-process
/// state only.
pub trait AmbientContext: Send + Sync {
    /// Snapshots the context active on the calling task.
    fn capture(&self) -> ContextToken;

    /// Makes a previously captured context active for the current task.
    fn install(&self, token: &ContextToken);

    /// Removes any installed context from the current task.
    fn clear(&self);
}

/// An opaque, cheaply cloneable snapshot of ambient context.
///
/// Providers put whatever they need inside via [`ContextToken::new`] and
/// get it back with [`ContextToken::downcast_ref`].
#[derive(Clone)]
pub struct ContextToken {
    inner: Arc<dyn Any + Send + Sync>,
}

impl ContextToken {
    /// Wraps a provider-specific value into a token.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// A token carrying no state.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Borrows the wrapped value, if it is of type `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl Default for ContextToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextToken").finish_non_exhaustive()
    }
}

/// RAII guard that keeps a context installed for the lifetime of a task
/// body and clears it on drop.
///
/// Dropping the guard clears the provider even when the body exits early
/// with an error or the task is aborted, so a pooled worker never carries
/// a stale context into its next task.
pub struct ContextGuard<'a> {
    provider: &'a dyn AmbientContext,
}

impl<'a> ContextGuard<'a> {
    /// Installs `token` on `provider` and returns the guard that will
    /// clear it.
    pub fn install(provider: &'a dyn AmbientContext, token: &ContextToken) -> Self {
        provider.install(token);
        Self { provider }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.provider.clear();
    }
}

/// Provider used when no ambient context is configured.
///
/// Captures empty tokens and treats install/clear as no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAmbientContext;

impl AmbientContext for NoopAmbientContext {
    fn capture(&self) -> ContextToken {
        ContextToken::empty()
    }

    fn install(&self, _token: &ContextToken) {}

    fn clear(&self) {}
}
