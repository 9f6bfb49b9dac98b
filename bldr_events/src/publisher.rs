use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::event::{Event, EventPayload, EventTime};

/// Sink for [`Event`]s. The core never depends on a concrete subscriber
/// (terminal UI, JUnit writer, analytics are external collaborators) — only
/// on this trait, injected at construction time. No process-wide singleton.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: Event);
}

/// Assigns monotonically-increasing [`EventTime`]s and forwards to an inner
/// publisher. Every component that emits events owns (or is given) one of
/// these rather than touching a global clock.
pub struct EventDispatcher<P: EventPublisher> {
    inner: P,
    counter: AtomicU64,
}

impl<P: EventPublisher> EventDispatcher<P> {
    pub fn new(inner: P) -> Self {
        EventDispatcher {
            inner,
            counter: AtomicU64::new(0),
        }
    }

    pub fn emit(&self, payload: EventPayload) {
        let event_time: EventTime = self.counter.fetch_add(1, Ordering::Relaxed);
        self.inner.publish(Event {
            event_time,
            payload,
        });
    }
}

/// Discards every event. Useful as a default when no subscriber is wired up.
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: Event) {}
}

/// Records every event in memory, for tests and for short-lived programmatic
/// consumers that want to inspect a run's event stream after the fact.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}
