// =============================================================================
// Matrixon Call Permissions - Test Host
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2026-10-19
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   In-memory host services for integration tests: room state store, state
//   event sender and a manually driven scheduler.
//
// =============================================================================

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use matrixon_call_permissions::{
    ruma::{
        event_id,
        events::{StateEventType, TimelineEventType},
        EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId,
    },
    Error, MatrixEvent, PluginServices, Result, RoomState, RoomStateReader, Scheduler,
    StateEventRequest, StateEventSender,
};

/// Room state store that applies submitted state events
pub struct InMemoryHost {
    state: Mutex<HashMap<OwnedRoomId, RoomState>>,
    submissions: Mutex<Vec<StateEventRequest>>,
    polls: AtomicU32,
    apply_writes: AtomicBool,
}

impl InMemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            apply_writes: AtomicBool::new(true),
        })
    }

    /// Accept submissions without making them visible to reads
    pub fn detached_writes(self: Arc<Self>) -> Arc<Self> {
        self.apply_writes.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_power_levels(&self, room_id: &RoomId, content: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .entry(room_id.to_owned())
            .or_default()
            .insert((StateEventType::RoomPowerLevels, String::new()), content);
    }

    pub fn power_levels(&self, room_id: &RoomId) -> Option<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .get(room_id)
            .and_then(|state| state.get(&(StateEventType::RoomPowerLevels, String::new())))
            .cloned()
    }

    pub fn submissions(&self) -> Vec<StateEventRequest> {
        self.submissions.lock().unwrap().clone()
    }

    /// Number of room state reads, including verification reads
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomStateReader for InMemoryHost {
    async fn room_state(&self, room_id: &RoomId) -> Result<RoomState> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StateEventSender for InMemoryHost {
    async fn send_state_event(&self, request: &StateEventRequest) -> Result<OwnedEventId> {
        let count = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(request.clone());
            submissions.len()
        };

        if self.apply_writes.load(Ordering::SeqCst) {
            self.state
                .lock()
                .unwrap()
                .entry(request.room_id.clone())
                .or_default()
                .insert(
                    (request.event_type.clone(), request.state_key.clone()),
                    request.content.clone(),
                );
        }

        EventId::parse(format!("$state{count}:example.org"))
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Sender that rejects every submission
pub struct RejectingSender;

#[async_trait]
impl StateEventSender for RejectingSender {
    async fn send_state_event(&self, _request: &StateEventRequest) -> Result<OwnedEventId> {
        Err(Error::BadServerResponse("M_FORBIDDEN".to_string()))
    }
}

/// Scheduler that queues tasks until the test runs them
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(Duration, BoxFuture<'static, ()>)>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Run the oldest queued task, returning the delay it was scheduled with
    pub async fn run_next(&self) -> Option<Duration> {
        let next = self.queue.lock().unwrap().pop_front();
        let (delay, task) = next?;
        task.await;
        Some(delay)
    }

    /// Run tasks, including newly scheduled ones, until the queue is empty
    pub async fn run_until_idle(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        while let Some(delay) = self.run_next().await {
            delays.push(delay);
        }
        delays
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        self.queue.lock().unwrap().push_back((delay, task));
    }
}

pub fn services(host: &Arc<InMemoryHost>, scheduler: &Arc<ManualScheduler>) -> PluginServices {
    PluginServices {
        state: host.clone(),
        sender: host.clone(),
        fallback_sender: host.clone(),
        scheduler: scheduler.clone(),
    }
}

pub fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

pub fn create_event(room_id: &RoomId, sender: OwnedUserId, content: serde_json::Value) -> MatrixEvent {
    MatrixEvent {
        event_id: event_id!("$create:example.org").to_owned(),
        event_type: TimelineEventType::RoomCreate,
        room_id: room_id.to_owned(),
        sender,
        state_key: Some(String::new()),
        content,
    }
}
