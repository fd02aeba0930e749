//! Engine notifications.
//!
//! Subscribers receive an mpsc [`Receiver`] and poll it at their own pace.
//! Each emitted event is delivered at most once per subscriber; dropping the
//! receiver unsubscribes.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::state::TrackingState;
use crate::types::Fix;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The store was connected or disconnected
    DatabaseChanged { ready: bool },
    CurrentBestChanged(Fix),
    TrackingStateChanged(TrackingState),
}

/// Ordered list of subscriber channels.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, forgetting the ones that hung up.
    pub fn emit(&mut self, event: EngineEvent) {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            log::debug!("[EventBus] Dropped {} closed subscribers", dropped);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_subscriber_gets_one_copy() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(EngineEvent::DatabaseChanged { ready: true });

        assert_eq!(a.try_recv().unwrap(), EngineEvent::DatabaseChanged { ready: true });
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap(), EngineEvent::DatabaseChanged { ready: true });
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(EngineEvent::TrackingStateChanged(TrackingState::Recording));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
