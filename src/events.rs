//! Session Event Bus
//!
//! Asynchronous pub/sub for session-level telemetry: connection lifecycle,
//! fetch results, and applied patches. Each session owns its own bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting { attempt: u32 },
    Connected,
    Disconnected { reason: String },
    /// Reconnect attempts exhausted; the channel stays down.
    GaveUp { attempts: u32 },
    /// Torn down by the session.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgendaEvent {
    Connection(ConnectionState),
    /// A fetch replaced the local set.
    RecordsReplaced { seq: u64, count: usize },
    /// A fetch response arrived after a newer one and was dropped.
    FetchDiscarded { seq: u64 },
    FetchFailed { reason: String },
    PatchApplied { service_id: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgendaEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AgendaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgendaEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
