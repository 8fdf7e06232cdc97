// =============================================================================
// Matrixon Call Permissions - Library Crate
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   In-process plugin for the Matrixon server that relaxes power levels for
//   call events (VoIP, group calls, call widgets) whenever a room is created.
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with thiserror
//   • Configuration with figment and serde
//   • Matrix protocol types with ruma
//
// =============================================================================

pub mod config;
pub mod service;
pub mod utils;

pub use config::{CallPermissionsConfig, RetryConfig};
pub use service::call_permissions::{CallPermissionsModule, RoomCreated};
pub use service::plugins::{
    api::{PluginServices, RoomState, RoomStateReader, StateEventRequest, StateEventSender},
    manager::PluginManager,
    scheduler::{Scheduler, TokioScheduler},
    EventHook, EventResponse, MatrixEvent, PluginInfo,
};
pub use utils::error::{Error, Result};

// Re-export common types
pub use ruma;
