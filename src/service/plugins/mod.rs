// =============================================================================
// Matrixon Call Permissions - Plugin Contract Module
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
//   Contract between the host server and in-process plugins. Plugins implement
//   `EventHook` and receive every event the host processes; host services
//   (room state, state event submission, scheduling) live in `api`.
//
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use ruma::{events::TimelineEventType, OwnedEventId, OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};

use crate::Result;

pub mod api;
pub mod manager;
pub mod scheduler;

/// Plugin API version for compatibility checking
pub const PLUGIN_API_VERSION: &str = "1.0.0";

/// Plugin hook execution timeout
pub const HOOK_TIMEOUT: Duration = Duration::from_millis(5000);

/**
 * Plugin information metadata.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin identifier
    pub id: String,
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// API version required
    pub api_version: String,
    /// Plugin description
    pub description: String,
    /// Event types the plugin reacts to
    pub hooks: Vec<String>,
}

/**
 * Matrix event representation for plugins.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixEvent {
    /// Event ID
    pub event_id: OwnedEventId,
    /// Event type
    pub event_type: TimelineEventType,
    /// Room ID
    pub room_id: OwnedRoomId,
    /// Sender ID
    pub sender: OwnedUserId,
    /// State key, present for state events
    pub state_key: Option<String>,
    /// Event content
    pub content: serde_json::Value,
}

/**
 * Plugin event response.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResponse {
    /// Whether event should continue processing
    pub continue_processing: bool,
    /// Reason when processing is stopped
    pub error: Option<String>,
}

impl EventResponse {
    /// Let the event continue through the pipeline
    pub fn allow() -> Self {
        Self {
            continue_processing: true,
            error: None,
        }
    }

    /// Stop processing the event
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            continue_processing: false,
            error: Some(reason.into()),
        }
    }
}

/**
 * Hook invoked by the host for every processed event.
 *
 * Implementations must not block: long running work is handed to the
 * host scheduler. An `Err` is logged by the manager and the event continues.
 */
#[async_trait]
pub trait EventHook: Send + Sync {
    /// Get plugin information
    fn info(&self) -> PluginInfo;

    /// Handle a Matrix event
    async fn on_event(&self, event: &MatrixEvent) -> Result<EventResponse>;
}

/**
 * Per-hook execution statistics.
 */
#[derive(Debug, Clone, Default)]
pub struct HookStats {
    /// Total hook executions
    pub executions: u64,
    /// Total execution time
    pub total_execution_time: Duration,
    /// Error count (errors, panics and timeouts)
    pub error_count: u64,
    /// Last error message
    pub last_error: Option<String>,
}

impl HookStats {
    pub fn avg_execution_time(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_execution_time.as_nanos() / u128::from(self.executions);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
