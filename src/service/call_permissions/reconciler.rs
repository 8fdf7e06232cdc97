// =============================================================================
// Matrixon Call Permissions - Permission Reconciler Module
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
//   Waits for a new room's power levels to exist, patches them so call events
//   are sendable at the configured level, and reads them back once.
//
//   INIT -> WAITING_READY -> PATCHING -> (NOOP | VERIFYING -> DONE)
//   WAITING_READY and PATCHING may end in FAILED.
//
// =============================================================================

use std::sync::Arc;

use futures::future::BoxFuture;
use ruma::{events::StateEventType, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::power_levels::{compute_patch, PowerLevelsContent, VerificationReport};
use crate::{
    config::CallPermissionsConfig,
    service::plugins::api::{PluginServices, StateEventRequest},
    Error, Result,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Transient state of one reconciliation, owned by its scheduled task chain
#[derive(Debug, Clone)]
pub struct ReconciliationAttempt {
    /// Correlation ID for logs and outcome events
    pub id: Uuid,
    pub room_id: OwnedRoomId,
    /// Room creator, acting user of last resort
    pub creator: OwnedUserId,
    /// 0-based poll counter
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ReconciliationAttempt {
    fn new(room_id: OwnedRoomId, creator: OwnedUserId, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            creator,
            attempt: 0,
            max_attempts,
        }
    }

    fn next(mut self) -> Self {
        self.attempt += 1;
        self
    }

    fn is_last(&self) -> bool {
        self.attempt + 1 >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Power levels never appeared in room state
    NeverReady { attempts: u32 },
    /// Power levels content could not be parsed or re-encoded
    MalformedPowerLevels(String),
    /// Both the privileged and the fallback submission failed
    SubmissionFailed(String),
}

/// Terminal state of a reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// Room was already compliant, nothing submitted
    Noop,
    /// Patch submitted; report is `None` if power levels were missing on read-back
    Applied {
        event_id: OwnedEventId,
        report: Option<VerificationReport>,
    },
    Failed(FailureReason),
}

/// Broadcast to subscribers when an attempt reaches a terminal state
#[derive(Debug, Clone)]
pub struct ReconciliationEvent {
    pub attempt_id: Uuid,
    pub room_id: OwnedRoomId,
    pub outcome: ReconciliationOutcome,
}

/**
 * Power levels reconciler.
 *
 * Attempts share nothing but configuration and host services; every attempt
 * works on its own copy of the room's power levels.
 */
pub struct PermissionReconciler {
    config: Arc<CallPermissionsConfig>,
    services: PluginServices,
    events: broadcast::Sender<ReconciliationEvent>,
}

impl PermissionReconciler {
    pub fn new(config: Arc<CallPermissionsConfig>, services: PluginServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            services,
            events,
        }
    }

    /// Receive terminal outcomes of attempts started after subscribing
    pub fn subscribe(&self) -> broadcast::Receiver<ReconciliationEvent> {
        self.events.subscribe()
    }

    /// Start reconciling a room; the first poll runs after the first backoff delay
    pub fn start(self: &Arc<Self>, room_id: OwnedRoomId, creator: OwnedUserId) -> Uuid {
        let attempt = ReconciliationAttempt::new(room_id, creator, self.config.retry.max_attempts);
        let id = attempt.id;
        info!("🆕 Reconciling call permissions for {} (attempt {})", attempt.room_id, id);
        self.schedule_poll(attempt);
        id
    }

    fn schedule_poll(self: &Arc<Self>, attempt: ReconciliationAttempt) {
        let delay = self.config.retry.delay_for(attempt.attempt);
        debug!("⏰ Polling {} in {:?}", attempt.room_id, delay);
        self.services
            .scheduler
            .schedule(delay, Arc::clone(self).poll(attempt));
    }

    fn poll(self: Arc<Self>, attempt: ReconciliationAttempt) -> BoxFuture<'static, ()> {
        let span = info_span!("call_permissions", room_id = %attempt.room_id, attempt_id = %attempt.id);
        Box::pin(
            async move {
                info!("⏳ Attempt {}/{}", attempt.attempt + 1, attempt.max_attempts);

                match self.power_levels(&attempt.room_id).await {
                    Ok(Some(content)) => {
                        info!("✅ Room {} is ready", attempt.room_id);
                        self.reconcile(attempt, content).await;
                    }
                    Ok(None) => self.retry_or_fail(attempt),
                    Err(e) => {
                        warn!("⚠️ Failed to read state of {}: {}", attempt.room_id, e);
                        self.retry_or_fail(attempt);
                    }
                }
            }
            .instrument(span),
        )
    }

    fn retry_or_fail(self: &Arc<Self>, attempt: ReconciliationAttempt) {
        if attempt.is_last() {
            error!(
                "❌ Room {} never became ready after {} attempts",
                attempt.room_id, attempt.max_attempts
            );
            let attempts = attempt.max_attempts;
            self.finish(&attempt, ReconciliationOutcome::Failed(FailureReason::NeverReady { attempts }));
            return;
        }

        debug!("Room {} not ready, retrying", attempt.room_id);
        self.schedule_poll(attempt.next());
    }

    async fn power_levels(&self, room_id: &RoomId) -> Result<Option<serde_json::Value>> {
        self.services
            .state
            .state_event(room_id, &StateEventType::RoomPowerLevels, "")
            .await
    }

    #[instrument(level = "debug", skip(self, attempt, content))]
    async fn reconcile(self: &Arc<Self>, attempt: ReconciliationAttempt, content: serde_json::Value) {
        let request = match self.prepare(&attempt, &content) {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("✅ Room {} already correct", attempt.room_id);
                self.finish(&attempt, ReconciliationOutcome::Noop);
                return;
            }
            Err(e) => {
                error!("❌ Malformed power levels in {}: {}", attempt.room_id, e);
                let reason = FailureReason::MalformedPowerLevels(e.to_string());
                self.finish(&attempt, ReconciliationOutcome::Failed(reason));
                return;
            }
        };

        match self.submit(&request).await {
            Ok(event_id) => {
                info!("✅ Power levels updated in {} ({})", attempt.room_id, event_id);
                self.schedule_verification(attempt, event_id);
            }
            Err(e) => {
                error!("❌ Failed to update power levels in {}: {}", attempt.room_id, e);
                let reason = FailureReason::SubmissionFailed(e.to_string());
                self.finish(&attempt, ReconciliationOutcome::Failed(reason));
            }
        }
    }

    /// Build the replacement state event, or `None` when nothing changes
    fn prepare(
        &self,
        attempt: &ReconciliationAttempt,
        content: &serde_json::Value,
    ) -> Result<Option<StateEventRequest>> {
        let current = PowerLevelsContent::from_json(content)?;
        info!("📊 Current events_default: {}", current.events_default);

        let Some(patch) = compute_patch(&current, &self.config) else {
            return Ok(None);
        };

        info!("🔄 Applying {} changes", patch.changes.len());
        for change in patch.changes.iter().take(5) {
            info!("   • {}", change);
        }

        let sender = patch
            .content
            .find_authorizing_user()
            .unwrap_or_else(|| attempt.creator.clone());
        info!("👤 Using user: {}", sender);

        Ok(Some(StateEventRequest {
            room_id: attempt.room_id.clone(),
            event_type: StateEventType::RoomPowerLevels,
            state_key: String::new(),
            content: patch.content.to_json()?,
            sender,
        }))
    }

    /// Privileged submission with a single fallback; never retried beyond that
    async fn submit(&self, request: &StateEventRequest) -> Result<OwnedEventId> {
        match self.services.sender.send_state_event(request).await {
            Ok(event_id) => {
                info!("✅ Event sent: {}", event_id);
                Ok(event_id)
            }
            Err(e) => {
                error!("❌ Error sending state event: {}", e);
                info!("🔄 Trying fallback method...");
                match self.services.fallback_sender.send_state_event(request).await {
                    Ok(event_id) => {
                        info!("✅ Fallback success: {}", event_id);
                        Ok(event_id)
                    }
                    Err(fallback) => {
                        error!("❌ Fallback failed: {}", fallback);
                        Err(Error::BadServerResponse(format!(
                            "primary: {e}; fallback: {fallback}"
                        )))
                    }
                }
            }
        }
    }

    fn schedule_verification(self: &Arc<Self>, attempt: ReconciliationAttempt, event_id: OwnedEventId) {
        let this = Arc::clone(self);
        let span = info_span!("call_permissions_verify", room_id = %attempt.room_id, attempt_id = %attempt.id);
        self.services.scheduler.schedule(
            self.config.retry.verification_delay(),
            Box::pin(
                async move {
                    let report = this.verify(&attempt.room_id).await;
                    this.finish(&attempt, ReconciliationOutcome::Applied { event_id, report });
                }
                .instrument(span),
            ),
        );
    }

    /// Read power levels back once and log the checklist; never re-submits
    async fn verify(&self, room_id: &RoomId) -> Option<VerificationReport> {
        let content = match self.power_levels(room_id).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!("⚠️ Power levels missing in {} during verification", room_id);
                return None;
            }
            Err(e) => {
                error!("Error verifying {}: {}", room_id, e);
                return None;
            }
        };

        let current = match PowerLevelsContent::from_json(&content) {
            Ok(current) => current,
            Err(e) => {
                error!("Error verifying {}: {}", room_id, e);
                return None;
            }
        };

        let report = VerificationReport::build(&current, self.config.call_permission_level);
        info!("🔍 Verification for {}:", room_id);
        info!("   events_default: {}", report.events_default);
        for check in &report.checks {
            let status = if check.matches { "✅" } else { "❌" };
            info!("   {} {}: {}", status, check.event_type, check.level);
        }
        Some(report)
    }

    fn finish(&self, attempt: &ReconciliationAttempt, outcome: ReconciliationOutcome) {
        debug!("🏁 Attempt {} for {} finished: {:?}", attempt.id, attempt.room_id, outcome);
        // no subscribers is fine
        let _ = self.events.send(ReconciliationEvent {
            attempt_id: attempt.id,
            room_id: attempt.room_id.clone(),
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::{room_id, user_id};

    #[test]
    fn test_attempt_progression() {
        let attempt = ReconciliationAttempt::new(
            room_id!("!room:example.org").to_owned(),
            user_id!("@alice:example.org").to_owned(),
            3,
        );
        assert_eq!(attempt.attempt, 0);
        assert!(!attempt.is_last());

        let second = attempt.clone().next();
        assert_eq!(second.id, attempt.id);
        assert!(!second.is_last());

        let third = second.next();
        assert_eq!(third.attempt, 2);
        assert!(third.is_last());
    }

    #[test]
    fn test_single_attempt_is_last() {
        let attempt = ReconciliationAttempt::new(
            room_id!("!room:example.org").to_owned(),
            user_id!("@alice:example.org").to_owned(),
            1,
        );
        assert!(attempt.is_last());
    }
}
