// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pool of reusable execution contexts

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::resolve::Context;

const MAX_POOLED_CONTEXTS: usize = 256;

/// Hands out reset [`Context`]s and takes them back when the guard drops
#[derive(Debug, Default)]
pub struct ContextPool {
    idle: Mutex<Vec<Context>>,
    released: AtomicU64,
}

impl ContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> PooledContext<'_> {
        let ctx = self.idle.lock().pop().unwrap_or_default();
        PooledContext {
            pool: self,
            ctx,
            detached: false,
        }
    }

    /// Contexts currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Total number of contexts returned to the pool
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    fn release(&self, mut ctx: Context) {
        ctx.reset();
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut idle = self.idle.lock();
        if idle.len() < MAX_POOLED_CONTEXTS {
            idle.push(ctx);
        }
    }
}

/// A context on loan from a [`ContextPool`]
///
/// Returned exactly once on drop, including when the execution is canceled
/// or its future is dropped.
pub struct PooledContext<'a> {
    pool: &'a ContextPool,
    ctx: Context,
    detached: bool,
}

impl PooledContext<'_> {
    /// Take the context out of the pool for good, e.g. to hand it to a task
    pub fn detach(mut self) -> Context {
        self.detached = true;
        std::mem::take(&mut self.ctx)
    }
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if !self.detached {
            self.pool.release(std::mem::take(&mut self.ctx));
        }
    }
}
