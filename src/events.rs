//! Structured events that duties report instead of writing to a global logger.
//!
//! Duties receive an [`EventSink`] through their runtime parameters. The default
//! [`LogEventSink`] forwards every event to the [`log`] facade; tests use
//! [`RecordingEventSink`] to assert on what a duty did.

use crate::{
    cluster::ServerHolder, peon::LoadQueuePeon, server::ServerType, DataSegment, SegmentId,
};
use std::sync::Mutex;

/// Something noteworthy that happened during a coordinator cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// Reconciliation was skipped because the used segments are not known yet.
    UsedSegmentsUnknown,
    /// Reconciliation was skipped because metadata storage reported no used segments.
    NoUsedSegments,
    /// A server was left out of reconciliation because no load queue exists for it.
    MissingPeon {
        /// The name of the skipped server.
        server: String,
        /// The tier of the skipped server.
        tier: String,
    },
    /// A drop command was queued for a segment that is no longer used.
    DroppingUnneededSegment {
        /// The segment that will be dropped.
        segment: SegmentId,
        /// The server that holds the segment.
        server: String,
        /// The tier of the server.
        tier: String,
    },
    /// Summary of the drops that were queued in one tier during the cycle.
    UnneededSegmentsRemoved {
        /// The tier.
        tier: String,
        /// The number of queued drops.
        count: i64,
        /// The number of servers in the tier.
        servers: usize,
    },
    /// The state of a server's load queue at the end of the cycle.
    LoadQueueState(LoadQueueReport),
}

/// A snapshot of a server's load queue and capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadQueueReport {
    /// The name of the server.
    pub server: String,
    /// The type of the server.
    pub server_type: ServerType,
    /// The tier of the server.
    pub tier: String,
    /// The query priority of the server.
    pub priority: i32,
    /// Segments queued or in flight for loading.
    pub to_load: usize,
    /// Segments queued or in flight for dropping.
    pub to_drop: usize,
    /// The total size of the segments to load.
    pub queued_bytes: u64,
    /// The bytes the server reported holding.
    pub served_bytes: u64,
    /// The bytes the server could still hold.
    pub available_bytes: u64,
    /// The used share of the server's capacity, in percent.
    pub percent_used: f64,
    /// Loads that failed since the previous report.
    pub failed_loads: usize,
}

impl LoadQueueReport {
    /// Reports the queue of `peon` for the server in `holder`.
    ///
    /// Resets the failed load counter of the peon.
    pub fn collect(holder: &ServerHolder, peon: &LoadQueuePeon) -> Self {
        let server = holder.server();
        Self {
            server: server.name().to_owned(),
            server_type: server.server_type(),
            tier: server.tier().to_owned(),
            priority: server.priority(),
            to_load: peon.segments_to_load().len(),
            to_drop: peon.segments_to_drop().len(),
            queued_bytes: peon.load_queue_size_bytes(),
            served_bytes: holder.curr_size(),
            available_bytes: holder.available_size(),
            percent_used: holder.percent_used(),
            failed_loads: peon.get_and_reset_failed_assign_count(),
        }
    }
}

impl CoordinatorEvent {
    /// Creates a [`CoordinatorEvent::DroppingUnneededSegment`] event.
    pub fn dropping(segment: &DataSegment, server: &str, tier: &str) -> Self {
        Self::DroppingUnneededSegment {
            segment: segment.id().clone(),
            server: server.to_owned(),
            tier: tier.to_owned(),
        }
    }
}

/// Receives the events of a coordinator cycle.
///
/// Implementations must be cheap and non-blocking because they are called from within duties.
pub trait EventSink: Send + Sync {
    /// Handles a single event.
    fn emit(&self, event: CoordinatorEvent);
}

/// Writes every event to the [`log`] facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::UsedSegmentsUnknown => log::info!(
                "Used segments were not polled from metadata storage yet, skipping the cleanup \
                of segments from historicals."
            ),
            CoordinatorEvent::NoUsedSegments => log::info!(
                "Found 0 used segments, skipping the cleanup of segments from historicals."
            ),
            CoordinatorEvent::MissingPeon { server, tier } => log::warn!(
                "No load queue for server {} in tier {}, skipping it.",
                server,
                tier
            ),
            CoordinatorEvent::DroppingUnneededSegment {
                segment,
                server,
                tier,
            } => log::info!(
                "Dropping unneeded segment {} from server {} in tier {}.",
                segment,
                server,
                tier
            ),
            CoordinatorEvent::UnneededSegmentsRemoved {
                tier,
                count,
                servers,
            } => log::info!(
                "Removed {} unneeded segments among {} servers in tier {}.",
                count,
                servers,
                tier
            ),
            CoordinatorEvent::LoadQueueState(report) => log::info!(
                "Server [{}, {}, {}, priority {}] has {} left to load, {} left to drop, \
                {} bytes queued, {} bytes served, {} bytes available ({:.1}% used), \
                {} failed loads.",
                report.server,
                report.server_type,
                report.tier,
                report.priority,
                report.to_load,
                report.to_drop,
                report.queued_bytes,
                report.served_bytes,
                report.available_bytes,
                report.percent_used,
                report.failed_loads
            ),
        }
    }
}

/// Keeps all emitted events in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CoordinatorEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the events recorded so far.
    pub fn take(&self) -> Vec<CoordinatorEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: CoordinatorEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
