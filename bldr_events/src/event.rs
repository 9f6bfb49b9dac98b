use bldr_core::TargetId;
use serde::{Deserialize, Serialize};

/// A monotonically-increasing timestamp attached to every event. Not wall
/// clock time — just a tick counter owned by the publisher, so ordering is
/// stable even across processes with unsynchronized clocks.
pub type EventTime = u64;

/// Coarse classification carried alongside every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Statistics,
    Progress,
    Error,
}

/// Every significant transition the core can report. A tagged union rather
/// than a polymorphic event base class, so
/// subscribers dispatch with a single `match`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    GraphBuildStarted {
        target_count: usize,
    },
    GraphBuildCompleted {
        target_count: usize,
        edge_count: usize,
    },
    TargetStarted {
        target: TargetId,
    },
    TargetCompleted {
        target: TargetId,
        hash: String,
    },
    TargetFailed {
        target: TargetId,
        error: String,
    },
    TargetSkipped {
        target: TargetId,
        reason: String,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    CacheUpdate {
        key: String,
    },
    CacheEviction {
        key: String,
    },
    RemoteCachePush {
        key: String,
        bytes: u64,
    },
    RemoteCachePull {
        key: String,
        bytes: u64,
    },
    GcStarted,
    GcCompleted {
        bytes_freed: u64,
        blobs_removed: u64,
    },
    ActionCacheHit {
        key: String,
    },
    ActionCacheMiss {
        key: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TargetFailed { .. } => EventType::Error,
            EventPayload::GraphBuildStarted { .. }
            | EventPayload::TargetStarted { .. }
            | EventPayload::TargetCompleted { .. }
            | EventPayload::TargetSkipped { .. }
            | EventPayload::GcStarted
            | EventPayload::RemoteCachePush { .. }
            | EventPayload::RemoteCachePull { .. } => EventType::Progress,
            EventPayload::GraphBuildCompleted { .. }
            | EventPayload::CacheHit { .. }
            | EventPayload::CacheMiss { .. }
            | EventPayload::CacheUpdate { .. }
            | EventPayload::CacheEviction { .. }
            | EventPayload::GcCompleted { .. }
            | EventPayload::ActionCacheHit { .. }
            | EventPayload::ActionCacheMiss { .. } => EventType::Statistics,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_time: EventTime,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
