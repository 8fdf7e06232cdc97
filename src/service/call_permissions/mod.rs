// =============================================================================
// Matrixon Call Permissions - Module Entry Point
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
//   Plugin that lets ordinary members place calls in newly created rooms.
//   - Watches `m.room.create` events
//   - Skips excluded room types (spaces by default), keeps DMs
//   - Hands qualifying rooms to the power levels reconciler
//
//   The hook never rejects or fails an event: problems are logged and the
//   host's processing continues.
//
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use ruma::{events::TimelineEventType, OwnedRoomId, OwnedUserId};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    config::CallPermissionsConfig,
    service::plugins::{
        api::PluginServices, EventHook, EventResponse, MatrixEvent, PluginInfo,
        PLUGIN_API_VERSION,
    },
    Result,
};

pub mod power_levels;
pub mod reconciler;

pub use power_levels::{
    compute_patch, LevelCheck, PowerLevelChange, PowerLevelsContent, PowerLevelsPatch,
    VerificationReport, MODERATOR_LEVEL, VERIFICATION_CHECKLIST,
};
pub use reconciler::{
    FailureReason, PermissionReconciler, ReconciliationAttempt, ReconciliationEvent,
    ReconciliationOutcome,
};

/// Plugin identifier used for registration
pub const MODULE_ID: &str = "call_permissions";

/// A newly created room, as seen in its `m.room.create` event
#[derive(Debug, Clone)]
pub struct RoomCreated {
    pub room_id: OwnedRoomId,
    pub creator: OwnedUserId,
    pub content: serde_json::Value,
}

impl RoomCreated {
    /// `None` for anything but `m.room.create`
    pub fn from_event(event: &MatrixEvent) -> Option<Self> {
        if event.event_type != TimelineEventType::RoomCreate {
            return None;
        }

        Some(Self {
            room_id: event.room_id.clone(),
            creator: event.sender.clone(),
            content: event.content.clone(),
        })
    }

    /// Declared room type (`type` in the creation content)
    pub fn room_type(&self) -> Option<&str> {
        self.content.get("type").and_then(serde_json::Value::as_str)
    }

    pub fn is_direct(&self) -> bool {
        self.content
            .get("is_direct")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Whether a new room is left alone. Direct messages are never excluded.
pub fn should_exclude_room(config: &CallPermissionsConfig, room: &RoomCreated) -> bool {
    if let Some(room_type) = room.room_type() {
        if config.is_excluded_room_type(room_type) {
            info!("⏭️  Excluding room type: {}", room_type);
            return true;
        }
    }

    if room.is_direct() {
        info!("🎯 Processing DM room");
    }
    false
}

/**
 * Call permissions plugin.
 */
pub struct CallPermissionsModule {
    config: Arc<CallPermissionsConfig>,
    reconciler: Arc<PermissionReconciler>,
}

impl CallPermissionsModule {
    pub fn new(config: CallPermissionsConfig, services: PluginServices) -> Result<Self> {
        config.validate()?;

        info!("🚀 CallPermissionsModule started");
        info!("   Enabled: {}", config.enabled);
        info!("   Permission level: {}", config.call_permission_level);
        info!("   Set events_default: {}", config.also_set_events_default);
        info!("   Excluded room types: {:?}", config.excluded_room_types);

        let config = Arc::new(config);
        let reconciler = Arc::new(PermissionReconciler::new(Arc::clone(&config), services));
        Ok(Self { config, reconciler })
    }

    /// Create the module from the host's raw configuration block
    pub fn from_json_config(config: serde_json::Value, services: PluginServices) -> Result<Self> {
        Self::new(CallPermissionsConfig::from_value(config)?, services)
    }

    pub fn config(&self) -> &CallPermissionsConfig {
        &self.config
    }

    /// Outcomes of reconciliations started after subscribing
    pub fn subscribe(&self) -> broadcast::Receiver<ReconciliationEvent> {
        self.reconciler.subscribe()
    }

    /**
     * React to a new room.
     *
     * Returns the attempt ID when a reconciliation was scheduled, `None` when
     * the plugin is disabled or the room is excluded.
     */
    #[instrument(level = "debug", skip(self, room), fields(room_id = %room.room_id))]
    pub fn on_room_created(&self, room: RoomCreated) -> Option<Uuid> {
        if !self.config.enabled {
            debug!("Call permissions disabled, ignoring {}", room.room_id);
            return None;
        }

        if should_exclude_room(&self.config, &room) {
            return None;
        }

        info!("🆕 NEW ROOM: {} by {}", room.room_id, room.creator);
        Some(self.reconciler.start(room.room_id, room.creator))
    }
}

#[async_trait]
impl EventHook for CallPermissionsModule {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: MODULE_ID.to_string(),
            name: "Auto Call Permissions".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: PLUGIN_API_VERSION.to_string(),
            description: "Lets room members send call events in newly created rooms".to_string(),
            hooks: vec![TimelineEventType::RoomCreate.to_string()],
        }
    }

    async fn on_event(&self, event: &MatrixEvent) -> Result<EventResponse> {
        if let Some(room) = RoomCreated::from_event(event) {
            debug!("🔍 Processing {} for room {}", event.event_type, event.room_id);
            self.on_room_created(room);
        }

        Ok(EventResponse::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::{event_id, room_id, user_id};
    use serde_json::json;

    fn create_event(content: serde_json::Value) -> MatrixEvent {
        MatrixEvent {
            event_id: event_id!("$create:example.org").to_owned(),
            event_type: TimelineEventType::RoomCreate,
            room_id: room_id!("!room:example.org").to_owned(),
            sender: user_id!("@alice:example.org").to_owned(),
            state_key: Some(String::new()),
            content,
        }
    }

    #[test]
    fn test_room_created_from_create_event() {
        let room = RoomCreated::from_event(&create_event(json!({ "type": "m.space" }))).unwrap();
        assert_eq!(room.creator.as_str(), "@alice:example.org");
        assert_eq!(room.room_type(), Some("m.space"));
        assert!(!room.is_direct());
    }

    #[test]
    fn test_other_events_are_ignored() {
        let mut event = create_event(json!({}));
        event.event_type = TimelineEventType::RoomMessage;
        assert!(RoomCreated::from_event(&event).is_none());
    }

    #[test]
    fn test_space_is_excluded() {
        let config = CallPermissionsConfig::default();
        let room = RoomCreated::from_event(&create_event(json!({
            "type": "m.space",
            "is_direct": true,
        })))
        .unwrap();
        assert!(should_exclude_room(&config, &room));
    }

    #[test]
    fn test_regular_and_direct_rooms_are_accepted() {
        let config = CallPermissionsConfig::default();

        let regular = RoomCreated::from_event(&create_event(json!({ "room_version": "10" }))).unwrap();
        assert!(!should_exclude_room(&config, &regular));

        let direct = RoomCreated::from_event(&create_event(json!({ "is_direct": true }))).unwrap();
        assert!(direct.is_direct());
        assert!(!should_exclude_room(&config, &direct));
    }

    #[test]
    fn test_custom_excluded_types() {
        let config = CallPermissionsConfig {
            excluded_room_types: vec!["org.example.lobby".to_string()],
            ..Default::default()
        };

        let lobby = RoomCreated::from_event(&create_event(json!({ "type": "org.example.lobby" }))).unwrap();
        let space = RoomCreated::from_event(&create_event(json!({ "type": "m.space" }))).unwrap();
        assert!(should_exclude_room(&config, &lobby));
        assert!(!should_exclude_room(&config, &space));
    }

    #[test]
    fn test_non_string_room_type_is_accepted() {
        let config = CallPermissionsConfig::default();
        let room = RoomCreated::from_event(&create_event(json!({ "type": 5 }))).unwrap();
        assert!(!should_exclude_room(&config, &room));
    }
}
