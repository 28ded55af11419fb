// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Run an action unless a token is cancelled before a deadline
//!
//! Used for connection lifecycle deadlines such as waiting for a
//! subscription's initialization handshake.

use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

pub struct TimeOutParams {
    /// Label used in log output
    pub name: String,
    pub duration: Duration,
    /// Cancelling this before `duration` elapses stops the timer
    pub cancel: CancellationToken,
    pub action: Box<dyn FnOnce() + Send>,
}

impl TimeOutParams {
    pub fn new(
        name: impl Into<String>,
        duration: Duration,
        cancel: CancellationToken,
        action: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            duration,
            cancel,
            action: Box::new(action),
        }
    }
}

/// Wait for either the token or the timer, running the action if the timer wins
///
/// Returns `true` when the action ran.
pub async fn time_out_checker(params: TimeOutParams) -> bool {
    let TimeOutParams {
        name,
        duration,
        cancel,
        action,
    } = params;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("{} completed before its {:?} timeout", name, duration);
            false
        }
        _ = tokio::time::sleep(duration) => {
            debug!("{} timed out after {:?}", name, duration);
            action();
            true
        }
    }
}

/// Spawn [`time_out_checker`] on the current runtime
pub fn spawn_time_out_checker(params: TimeOutParams) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(time_out_checker(params))
}
