// =============================================================================
// Matrixon Call Permissions - Scheduler Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Deferred execution for plugins. Tasks are resubmitted to a timer instead
//   of sleeping on the caller, so concurrent work on the shared runtime is
//   never starved.
//
// =============================================================================

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::{Error, Result};

/// Runs a task after a delay without blocking the caller
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>);
}

/// Timer-based scheduler on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on
    pub fn from_current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            error!("❌ No tokio runtime available for plugin scheduler: {}", e);
            Error::Internal(format!("No tokio runtime available: {e}"))
        })?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        debug!("⏰ Scheduling task in {:?}", delay);
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
    }
}
