// =============================================================================
// Matrixon Call Permissions - Plugin Host API Module
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
//   Host services exposed to plugins: room state lookup, privileged state
//   event submission and deferred scheduling. The host owns the room state;
//   plugins must not assume their writes are visible to the next read.
//
// =============================================================================

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use ruma::{events::StateEventType, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId};
use serde::{Deserialize, Serialize};

use super::scheduler::Scheduler;
use crate::Result;

/// Current room state: `(event type, state key)` to event content
pub type RoomState = HashMap<(StateEventType, String), serde_json::Value>;

/**
 * Room state lookup service.
 */
#[async_trait]
pub trait RoomStateReader: Send + Sync {
    /// Get the full current state of a room
    async fn room_state(&self, room_id: &RoomId) -> Result<RoomState>;

    /// Get the content of a single state item, if present
    async fn state_event(
        &self,
        room_id: &RoomId,
        event_type: &StateEventType,
        state_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut state = self.room_state(room_id).await?;
        Ok(state.remove(&(event_type.clone(), state_key.to_owned())))
    }
}

/**
 * State event to be submitted on behalf of a user.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEventRequest {
    /// Target room
    pub room_id: OwnedRoomId,
    /// State event type
    pub event_type: StateEventType,
    /// State key
    pub state_key: String,
    /// Full replacement content
    pub content: serde_json::Value,
    /// Acting user
    pub sender: OwnedUserId,
}

/**
 * State event submission service.
 *
 * A submission is atomic: the whole content lands or nothing does. The host
 * applies its own authorization rules.
 */
#[async_trait]
pub trait StateEventSender: Send + Sync {
    /// Create and send a state event, returning its event ID
    async fn send_state_event(&self, request: &StateEventRequest) -> Result<OwnedEventId>;
}

/**
 * Host services available to plugins.
 */
#[derive(Clone)]
pub struct PluginServices {
    /// Room state lookup
    pub state: Arc<dyn RoomStateReader>,
    /// Privileged event creation path (no rate limiting)
    pub sender: Arc<dyn StateEventSender>,
    /// Alternate submission path tried once when `sender` fails
    pub fallback_sender: Arc<dyn StateEventSender>,
    /// Deferred task scheduler
    pub scheduler: Arc<dyn Scheduler>,
}

impl std::fmt::Debug for PluginServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginServices")
            .field("state", &"RoomStateReader")
            .field("sender", &"StateEventSender")
            .field("fallback_sender", &"StateEventSender")
            .field("scheduler", &"Scheduler")
            .finish()
    }
}
