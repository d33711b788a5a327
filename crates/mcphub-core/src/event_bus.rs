//! In-process event bus.
//!
//! A broadcast channel fans every [`HubEvent`] out to all receivers: the
//! subscription layer (which forwards to external clients), log mirrors, and
//! tests. Emitting never blocks the producer; a receiver that falls behind
//! skips the missed events and keeps going.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::event::HubEvent;

/// Capacity of the underlying broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for hub events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A cloneable sender for emitters.
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// A fresh receiver seeing every event emitted from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Emitting half, handed to supervisors and the hub core.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<HubEvent>,
}

impl EventSender {
    /// Emit an event; returns the number of receivers that saw it. Zero
    /// receivers is not an error.
    pub fn emit(&self, event: HubEvent) -> usize {
        let type_name = event.type_name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event = type_name, receivers = count, "[EventBus] Emitted");
                count
            }
            Err(_) => {
                debug!(event = type_name, "[EventBus] No receivers");
                0
            }
        }
    }
}

/// Receiving half.
pub struct EventReceiver {
    receiver: broadcast::Receiver<HubEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once the bus is gone. A lagged receiver logs
    /// and continues with the next available event.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[EventBus] Receiver lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<HubEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "[EventBus] Receiver lagged on try_recv");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Shared bus handle for the whole hub process.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{ConnectionState, HubState};

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let sender = bus.sender();
        let mut receiver = bus.subscribe();

        sender.emit(HubEvent::HubStateChanged {
            state: HubState::Ready,
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.type_name(), "hub_state_changed");
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let sender = bus.sender();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        sender.emit(HubEvent::ServerStateChanged {
            server: "a".into(),
            state: ConnectionState::Connected,
            message: None,
        });

        assert_eq!(rx1.recv().await.unwrap().server(), Some("a"));
        assert_eq!(rx2.recv().await.unwrap().server(), Some("a"));
    }

    #[test]
    fn test_emit_without_receivers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(
            bus.sender().emit(HubEvent::HubStateChanged {
                state: HubState::Stopped
            }),
            0
        );
    }

    #[tokio::test]
    async fn test_per_receiver_fifo_order() {
        let bus = EventBus::new();
        let sender = bus.sender();
        let mut rx = bus.subscribe();

        for name in ["a", "b", "c"] {
            sender.emit(HubEvent::ToolsChanged {
                server: name.into(),
            });
        }
        for expected in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap().server(), Some(expected));
        }
    }
}
