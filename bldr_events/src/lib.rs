//! Typed telemetry events emitted by the core.

pub mod event;
pub mod publisher;

pub use event::{Event, EventPayload, EventTime, EventType};
pub use publisher::{EventDispatcher, EventPublisher, NullPublisher, RecordingPublisher};
