// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Response sinks
//!
//! The resolver renders a complete response before handing it to a writer,
//! so a writer only ever sees whole JSON documents.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ResolveError;

pub trait ResponseWriter: Send {
    /// Write one complete response document
    fn write(&mut self, response: &[u8]) -> Result<(), ResolveError>;

    /// Push buffered responses to the client
    fn flush(&mut self) -> Result<(), ResolveError> {
        Ok(())
    }

    /// No more responses will follow
    fn complete(&mut self) {}
}

impl ResponseWriter for Vec<u8> {
    fn write(&mut self, response: &[u8]) -> Result<(), ResolveError> {
        self.extend_from_slice(response);
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for Box<W> {
    fn write(&mut self, response: &[u8]) -> Result<(), ResolveError> {
        (**self).write(response)
    }

    fn flush(&mut self) -> Result<(), ResolveError> {
        (**self).flush()
    }

    fn complete(&mut self) {
        (**self).complete()
    }
}

#[derive(Debug, Default)]
struct Recorded {
    pending: Vec<u8>,
    messages: Vec<String>,
    completed: bool,
}

/// Writer that keeps every flushed response in memory
///
/// Clones share the same buffer, so one clone can be handed to the engine
/// while another inspects what was written.
#[derive(Debug, Clone, Default)]
pub struct BufferedResponseWriter {
    inner: Arc<Mutex<Recorded>>,
}

impl BufferedResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushed responses in write order
    pub fn messages(&self) -> Vec<String> {
        self.inner.lock().messages.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }
}

impl ResponseWriter for BufferedResponseWriter {
    fn write(&mut self, response: &[u8]) -> Result<(), ResolveError> {
        let mut inner = self.inner.lock();
        if inner.completed {
            return Err(ResolveError::Write("writer already completed".to_string()));
        }
        inner.pending.extend_from_slice(response);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ResolveError> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut inner.pending);
        let message =
            String::from_utf8(pending).map_err(|e| ResolveError::Write(e.to_string()))?;
        inner.messages.push(message);
        Ok(())
    }

    fn complete(&mut self) {
        self.inner.lock().completed = true;
    }
}
