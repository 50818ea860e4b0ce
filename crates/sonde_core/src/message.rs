//! Message Types for Thread Communication
//!
//! Events flow from the render thread -> observers. Nothing flows the other
//! way: observers steer a target through its atomic flag, the program
//! reference and parameter values.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryIter, TryRecvError, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Events published by a [`RenderTarget`](crate::RenderTarget)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TargetEvent {
    /// Render thread entered its loop
    Started,

    /// Render thread exited its loop
    Stopped { cycles: u64, overruns: u64 },

    /// The frame source ran dry; the target stopped normally
    EndOfSource,

    /// A stage failed and the target stopped
    Error { message: String },

    /// The installed program was edited
    ProgramChanged { commands: usize },
}

/// Receiving end of one [`RenderTarget::events`](crate::RenderTarget::events)
/// subscription
///
/// Each subscriber has its own bounded queue. When it is full the oldest
/// event is discarded, so the most recent lifecycle events always arrive.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<TargetEvent>,
    _alive: Arc<()>,
}

impl EventReceiver {
    pub fn try_recv(&self) -> Result<TargetEvent, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<TargetEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Events queued right now, without blocking
    pub fn try_iter(&self) -> TryIter<'_, TargetEvent> {
        self.rx.try_iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

struct Subscriber {
    tx: Sender<TargetEvent>,
    /// Bus-side handle used to evict the oldest event
    rx: Receiver<TargetEvent>,
    alive: Weak<()>,
}

/// Fan-out of target events to every live subscriber; never blocks the
/// render thread
pub(crate) struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let alive = Arc::new(());
        self.subscribers.lock().push(Subscriber {
            tx,
            rx: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        EventReceiver { rx, _alive: alive }
    }

    pub(crate) fn publish(&self, event: TargetEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.alive.strong_count() > 0);
        for subscriber in subscribers.iter() {
            let mut pending = event.clone();
            loop {
                match subscriber.tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(event)) => {
                        if let Ok(oldest) = subscriber.rx.try_recv() {
                            tracing::trace!("Event queue full, dropping {:?}", oldest);
                        }
                        pending = event;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| s.alive.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = TargetEvent::Stopped {
            cycles: 12,
            overruns: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Stopped\""));
        let back: TargetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let bus = EventBus::new(2);
        let rx = bus.subscribe();
        bus.publish(TargetEvent::Started);
        bus.publish(TargetEvent::EndOfSource);
        bus.publish(TargetEvent::ProgramChanged { commands: 3 });

        assert_eq!(rx.try_recv().unwrap(), TargetEvent::EndOfSource);
        assert_eq!(rx.try_recv().unwrap(), TargetEvent::ProgramChanged { commands: 3 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_every_subscriber_gets_every_event() {
        let bus = EventBus::new(8);
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(TargetEvent::Started);
        bus.publish(TargetEvent::EndOfSource);

        let expected = vec![TargetEvent::Started, TargetEvent::EndOfSource];
        assert_eq!(a.try_iter().collect::<Vec<_>>(), expected);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_dropped_subscriber_is_forgotten() {
        let bus = EventBus::new(4);
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(TargetEvent::Started);
        assert_eq!(kept.len(), 1);
        assert_eq!(bus.subscribers.lock().len(), 1);
    }
}
