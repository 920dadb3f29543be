//! Manager lifecycle events
//!
//! Observers subscribe to a tokio broadcast channel instead of registering
//! callbacks. Publishing never blocks and never fails when nobody listens.

use crate::data::Resolution;
use serde::Serialize;
use tokio::sync::broadcast;

/// Something the viewport may want to react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// A blocking load started
    LoadingStart { resolution: Resolution, generation: u64 },
    /// A blocking load finished (successfully or not)
    LoadingEnd { resolution: Resolution, generation: u64 },
    /// The displayed tier changed
    ResolutionChange { from: Resolution, to: Resolution },
    /// A background refinement started
    BackgroundLoadStart { resolution: Resolution, generation: u64 },
    /// A background refinement settled for the current generation
    BackgroundLoadComplete {
        resolution: Resolution,
        generation: u64,
        success: bool,
    },
}

/// Fan-out of manager events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber
    pub fn emit(&self, event: ManagerEvent) {
        tracing::trace!(?event, "Manager event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(ManagerEvent::ResolutionChange {
            from: Resolution::Coarse,
            to: Resolution::Fine,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.emit(ManagerEvent::LoadingStart {
            resolution: Resolution::Medium,
            generation: 1,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ManagerEvent::LoadingStart {
                resolution: Resolution::Medium,
                generation: 1
            }
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = ManagerEvent::ResolutionChange {
            from: Resolution::Coarse,
            to: Resolution::Medium,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"resolution_change","from":"coarse","to":"medium"}"#
        );
    }
}
