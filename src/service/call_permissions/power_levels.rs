// =============================================================================
// Matrixon Call Permissions - Power Levels Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   `m.room.power_levels` content model and the pure parts of reconciliation:
//   patch computation, authorizing user selection and read-back verification.
//
// =============================================================================

use std::{collections::BTreeMap, fmt};

use ruma::OwnedUserId;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{config::CallPermissionsConfig, Result};

/// Lowest power level treated as a moderator
pub const MODERATOR_LEVEL: i64 = 50;

/// Event types read back after a submission
pub const VERIFICATION_CHECKLIST: [&str; 3] = [
    "m.call.invite",
    "m.call.member",
    "org.matrix.msc3401.call.member",
];

fn fifty() -> i64 {
    50
}

// Older room versions allow levels as strings ("50"); ruma's compat
// deserializers accept both forms
fn level<'de, D>(de: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    ruma::serde::deserialize_v1_powerlevel(de).map(i64::from)
}

fn levels<'de, D, K>(de: D) -> std::result::Result<BTreeMap<K, i64>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord,
{
    let levels = ruma::serde::btreemap_deserialize_v1_powerlevel_values(de)?;
    Ok(levels
        .into_iter()
        .map(|(key, level)| (key, i64::from(level)))
        .collect())
}

/// `m.room.power_levels` content.
///
/// Keys this type does not model are kept in `other` so a replacement event
/// never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLevelsContent {
    /// Level required to ban a user
    #[serde(default = "fifty", deserialize_with = "level")]
    pub ban: i64,
    /// Level required to send specific event types
    #[serde(default, deserialize_with = "levels")]
    pub events: BTreeMap<String, i64>,
    /// Level required for event types not listed in `events`
    #[serde(default, deserialize_with = "level")]
    pub events_default: i64,
    /// Level required to invite a user
    #[serde(default = "fifty", deserialize_with = "level")]
    pub invite: i64,
    /// Level required to kick a user
    #[serde(default = "fifty", deserialize_with = "level")]
    pub kick: i64,
    /// Level required to redact an event
    #[serde(default = "fifty", deserialize_with = "level")]
    pub redact: i64,
    /// Level required for state events not listed in `events`
    #[serde(default = "fifty", deserialize_with = "level")]
    pub state_default: i64,
    /// Per-user levels
    #[serde(default, deserialize_with = "levels")]
    pub users: BTreeMap<OwnedUserId, i64>,
    /// Level of users not listed in `users`
    #[serde(default, deserialize_with = "level")]
    pub users_default: i64,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl PowerLevelsContent {
    /// Parse into an owned copy; the host's value is left untouched
    pub fn from_json(content: &serde_json::Value) -> Result<Self> {
        Ok(Self::deserialize(content)?)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Level currently required to send `event_type`
    pub fn event_level(&self, event_type: &str) -> i64 {
        self.events
            .get(event_type)
            .copied()
            .unwrap_or(self.events_default)
    }

    /// First user, in user ID order, with at least moderator level
    pub fn find_authorizing_user(&self) -> Option<OwnedUserId> {
        self.users
            .iter()
            .find(|(_, level)| **level >= MODERATOR_LEVEL)
            .map(|(user_id, _)| user_id.clone())
    }
}

/// A single pending change to the power levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerLevelChange {
    Event {
        event_type: String,
        old: Option<i64>,
        new: i64,
    },
    EventsDefault {
        old: i64,
        new: i64,
    },
}

impl fmt::Display for PowerLevelChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event {
                event_type,
                old: Some(old),
                new,
            } => write!(f, "{event_type}: {old} → {new}"),
            Self::Event {
                event_type,
                old: None,
                new,
            } => write!(f, "{event_type}: not set → {new}"),
            Self::EventsDefault { old, new } => write!(f, "events_default: {old} → {new}"),
        }
    }
}

/// Changes needed to make a room compliant, with the full replacement content
#[derive(Debug, Clone, PartialEq)]
pub struct PowerLevelsPatch {
    pub changes: Vec<PowerLevelChange>,
    pub content: PowerLevelsContent,
}

/// Compute the patch for `current`, or `None` when the room is already compliant.
///
/// Call event types whose effective level differs from the target are set
/// explicitly. `events_default` is only ever lowered.
pub fn compute_patch(
    current: &PowerLevelsContent,
    config: &CallPermissionsConfig,
) -> Option<PowerLevelsPatch> {
    let target = config.call_permission_level;
    let mut content = current.clone();
    let mut changes = Vec::new();

    for event_type in &config.call_event_types {
        if current.event_level(event_type) != target {
            let old = content.events.insert(event_type.clone(), target);
            changes.push(PowerLevelChange::Event {
                event_type: event_type.clone(),
                old,
                new: target,
            });
        }
    }

    if config.also_set_events_default && current.events_default > target {
        changes.push(PowerLevelChange::EventsDefault {
            old: current.events_default,
            new: target,
        });
        content.events_default = target;
    }

    if changes.is_empty() {
        return None;
    }

    Some(PowerLevelsPatch { changes, content })
}

/// Result of reading one event type back after a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelCheck {
    pub event_type: String,
    pub level: i64,
    pub matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub events_default: i64,
    pub checks: Vec<LevelCheck>,
}

impl VerificationReport {
    pub fn build(content: &PowerLevelsContent, target: i64) -> Self {
        let checks = VERIFICATION_CHECKLIST
            .iter()
            .map(|event_type| {
                let level = content.event_level(event_type);
                LevelCheck {
                    event_type: event_type.to_string(),
                    level,
                    matches: level == target,
                }
            })
            .collect();

        Self {
            events_default: content.events_default,
            checks,
        }
    }

    pub fn all_match(&self) -> bool {
        self.checks.iter().all(|check| check.matches)
    }
}
