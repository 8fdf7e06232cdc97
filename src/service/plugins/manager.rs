// =============================================================================
// Matrixon Call Permissions - Plugin Manager Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Hook registry and dispatcher. A failing, panicking or slow hook is logged
//   and counted, but never aborts the host's processing of the event or the
//   dispatch to other hooks.
//
// =============================================================================

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::{EventHook, EventResponse, HookStats, MatrixEvent, HOOK_TIMEOUT};
use crate::{Error, Result};

/**
 * Main plugin manager service.
 *
 * Hooks are called in registration order.
 */
pub struct PluginManager {
    /// Registered hooks with their IDs, in registration order
    hooks: RwLock<Vec<(String, Arc<dyn EventHook>)>>,
    /// Per-hook statistics
    stats: Mutex<HashMap<String, HookStats>>,
    /// Hook execution timeout
    hook_timeout: Duration,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self::with_timeout(HOOK_TIMEOUT)
    }

    pub fn with_timeout(hook_timeout: Duration) -> Self {
        info!("🔌 Initializing Plugin Manager");
        Self {
            hooks: RwLock::new(Vec::new()),
            stats: Mutex::new(HashMap::new()),
            hook_timeout,
        }
    }

    /// Register a hook; IDs must be unique
    pub fn register(&self, hook: Arc<dyn EventHook>) -> Result<()> {
        let info = hook.info();
        let mut hooks = self
            .hooks
            .write()
            .map_err(|_| Error::Internal("Failed to acquire plugin lock".to_string()))?;

        if hooks.iter().any(|(id, _)| *id == info.id) {
            warn!("⚠️ Plugin {} already registered", info.id);
            return Err(Error::BadRequest(format!("Plugin {} already registered", info.id)));
        }

        hooks.push((info.id.clone(), hook));
        info!("✅ Plugin {} v{} registered for {:?}", info.id, info.version, info.hooks);
        Ok(())
    }

    /// Number of registered hooks
    pub fn hook_count(&self) -> usize {
        self.hooks.read().map(|hooks| hooks.len()).unwrap_or(0)
    }

    /// Statistics for a registered hook
    pub async fn stats(&self, hook_id: &str) -> Option<HookStats> {
        self.stats.lock().await.get(hook_id).cloned()
    }

    /**
     * Dispatch an event to every registered hook.
     *
     * Stops early only when a hook explicitly denies the event.
     */
    #[instrument(level = "debug", skip(self, event), fields(event_type = %event.event_type, room_id = %event.room_id))]
    pub async fn dispatch(&self, event: &MatrixEvent) -> EventResponse {
        let hooks = match self.hooks.read() {
            Ok(hooks) => hooks.clone(),
            Err(_) => {
                error!("❌ Plugin lock poisoned, skipping hooks");
                return EventResponse::allow();
            }
        };

        for (hook_id, hook) in hooks {
            let start = Instant::now();
            let outcome = tokio::time::timeout(
                self.hook_timeout,
                AssertUnwindSafe(hook.on_event(event)).catch_unwind(),
            )
            .await;
            let elapsed = start.elapsed();

            let (response, failure) = match outcome {
                Ok(Ok(Ok(response))) => (response, None),
                Ok(Ok(Err(e))) => {
                    warn!("⚠️ Plugin {} failed on {}: {}", hook_id, event.event_id, e);
                    (EventResponse::allow(), Some(e.to_string()))
                }
                Ok(Err(_)) => {
                    error!("❌ Plugin {} panicked on {}", hook_id, event.event_id);
                    (EventResponse::allow(), Some("hook panicked".to_string()))
                }
                Err(_) => {
                    error!("❌ Plugin {} timed out after {:?}", hook_id, self.hook_timeout);
                    (EventResponse::allow(), Some("hook timed out".to_string()))
                }
            };

            self.record(&hook_id, elapsed, failure).await;
            debug!("🔧 Plugin {} handled event in {:?}", hook_id, elapsed);

            if !response.continue_processing {
                info!("🚫 Plugin {} stopped processing of {}", hook_id, event.event_id);
                return response;
            }
        }

        EventResponse::allow()
    }

    /// Dispatch every event from the host's event stream until it closes
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<MatrixEvent>) {
        info!("🚀 Plugin dispatch loop started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.dispatch(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Plugin dispatch lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("🛑 Plugin dispatch loop stopped");
    }

    async fn record(&self, hook_id: &str, elapsed: Duration, failure: Option<String>) {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(hook_id.to_owned()).or_default();
        entry.executions += 1;
        entry.total_execution_time += elapsed;
        if let Some(message) = failure {
            entry.error_count += 1;
            entry.last_error = Some(message);
        }
    }
}
