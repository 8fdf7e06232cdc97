// =============================================================================
// Matrixon Call Permissions - Configuration Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Configuration management for the call permissions plugin
//   - Enable flag and target power level
//   - Excluded room types
//   - Call event types to relax
//   - Readiness retry and verification timing
//
// =============================================================================

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Environment variable prefix for overrides, e.g.
/// `MATRIXON_CALL_PERMISSIONS_RETRY__MAX_ATTEMPTS=3`
pub const ENV_PREFIX: &str = "MATRIXON_CALL_PERMISSIONS_";

/// Call signaling event types relaxed by default: 1:1 calls, group calls, widgets
pub const DEFAULT_CALL_EVENT_TYPES: [&str; 11] = [
    "m.call.invite",
    "m.call.answer",
    "m.call.hangup",
    "m.call.candidates",
    "m.call.select_answer",
    "m.call.reject",
    "m.call.negotiate",
    "org.matrix.msc3401.call",
    "org.matrix.msc3401.call.member",
    "m.call.member",
    "im.vector.modular.widgets",
];

/// Plugin configuration, read once when the module is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPermissionsConfig {
    /// Enable automatic call permissions for new rooms
    #[serde(alias = "enable_auto_call_permissions")]
    pub enabled: bool,
    /// Power level required to send call events after patching
    pub call_permission_level: i64,
    /// Also lower `events_default` to the target level (never raises it)
    pub also_set_events_default: bool,
    /// Room types (`m.room.create` content `type`) that are left untouched
    pub excluded_room_types: Vec<String>,
    /// Event types treated as call signaling
    pub call_event_types: Vec<String>,
    /// Readiness retry and verification timing
    pub retry: RetryConfig,
}

/// Readiness wait and verification timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of room state polls before giving up
    pub max_attempts: u32,
    /// Backoff base in seconds; the delay before poll `n` is `backoff_base^n`
    pub backoff_base: u64,
    /// Delay between a successful submission and the verification read
    pub verification_delay_ms: u64,
}

impl Default for CallPermissionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            call_permission_level: 0,
            also_set_events_default: true,
            excluded_room_types: vec!["m.space".to_string()],
            call_event_types: DEFAULT_CALL_EVENT_TYPES
                .iter()
                .map(|event_type| event_type.to_string())
                .collect(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base: 2,
            verification_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Delay before the given (0-based) poll
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base.saturating_pow(attempt))
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_millis(self.verification_delay_ms)
    }
}

impl CallPermissionsConfig {
    /// Load configuration from a TOML file, with environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        // missing keys fall back through #[serde(default)]
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        info!("✅ Loaded call permissions configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse the module's configuration block as handed over by the host
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value::<Self>(value)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the reconciler relies on
    pub fn validate(&self) -> Result<()> {
        if self.call_permission_level < 0 {
            return Err(Error::BadConfig(format!(
                "call_permission_level must be non-negative, got {}",
                self.call_permission_level
            )));
        }
        if self.call_event_types.is_empty() {
            return Err(Error::BadConfig("call_event_types must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::BadConfig("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.backoff_base == 0 {
            return Err(Error::BadConfig("retry.backoff_base must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn is_excluded_room_type(&self, room_type: &str) -> bool {
        self.excluded_room_types.iter().any(|excluded| excluded == room_type)
    }
}
