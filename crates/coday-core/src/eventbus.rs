// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session fan-out of [`Event`]s to any number of subscribers, with replay
//! for late joiners and a periodic heartbeat.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

use crate::events::{Event, EventKind};

/// Replay buffer size. The contract requires K >= 256.
const REPLAY_CAPACITY: usize = 256;
/// Bounded per-subscriber queue; a slow consumer that falls this far behind
/// is dropped rather than allowed to stall the producer.
const CHANNEL_CAPACITY: usize = 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
        }
    }

    /// Publish an event. Non-blocking; a subscriber too far behind to keep up
    /// is simply lagged (it will observe `RecvError::Lagged` and should treat
    /// that as "subscription closed" per the slow-consumer policy).
    pub fn publish(&self, kind: EventKind, parent_id: Option<String>) -> Event {
        let event = Event::new(kind, parent_id);
        {
            let mut history = self.history.lock().unwrap();
            if history.len() >= REPLAY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No receivers is not an error: history still records the event.
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn publish_warn(&self, message: impl Into<String>) -> Event {
        let message = message.into();
        warn!(%message, "session warning");
        self.publish(EventKind::Warn { message }, None)
    }

    pub fn publish_error(&self, message: impl Into<String>) -> Event {
        self.publish(EventKind::Error { message: message.into() }, None)
    }

    /// Subscribe to live events; returns the replay buffer snapshot alongside
    /// the live receiver so a late joiner can reconstruct recent history.
    pub fn subscribe(&self) -> (broadcast::Receiver<Event>, Vec<Event>) {
        let rx = self.sender.subscribe();
        let history = self.history.lock().unwrap().iter().cloned().collect();
        (rx, history)
    }

    /// Spawn a background task that emits a Heartbeat on this bus every
    /// [`HEARTBEAT_INTERVAL`] until `cancel` is signalled.
    pub fn spawn_heartbeat(self: &std::sync::Arc<Self>, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        bus.publish(EventKind::Heartbeat, None);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_returns_in_history() {
        let bus = EventBus::new();
        bus.publish(EventKind::Heartbeat, None);
        let (_, history) = bus.subscribe();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn live_subscriber_receives_published_event_in_order() {
        let bus = EventBus::new();
        let (mut rx, _) = bus.subscribe();
        bus.publish(EventKind::Answer { answer: "a".into() }, None);
        bus.publish(EventKind::Answer { answer: "b".into() }, None);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn replay_buffer_is_bounded() {
        let bus = EventBus::new();
        for _ in 0..(REPLAY_CAPACITY + 10) {
            bus.publish(EventKind::Heartbeat, None);
        }
        let (_, history) = bus.subscribe();
        assert_eq!(history.len(), REPLAY_CAPACITY);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.publish(EventKind::Heartbeat, None);
    }
}
