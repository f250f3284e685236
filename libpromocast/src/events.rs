//! Scheduler event bus
//!
//! The orchestrator and the engagement refresher announce what they did on a
//! `tokio::sync::broadcast` channel. Emitting never blocks: with no subscriber
//! the event is dropped, and a lagging subscriber loses the oldest events.
//!
//! ```no_run
//! use libpromocast::events::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::PostCancelled { post_id: "abc".to_string() });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PlatformKind;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging drops events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Why a cycle ended without publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CapReached,
    NoCandidate,
    Unconfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CycleSkipped {
        platform: PlatformKind,
        reason: SkipReason,
    },

    PostPublished {
        post_id: String,
        platform: PlatformKind,
        remote_id: String,
        simulated: bool,
    },

    PostFailed {
        post_id: String,
        platform: PlatformKind,
        error: String,
    },

    PostScheduled {
        post_id: String,
        platform: PlatformKind,
        scheduled_at: i64,
    },

    PostCancelled {
        post_id: String,
    },

    /// One refresher pass finished
    EngagementRefreshed {
        updated: usize,
        skipped: usize,
    },
}
