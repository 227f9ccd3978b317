//! The steps of a coordinator cycle.
//!
//! A duty takes the [`CoordinatorRuntimeParams`] of the current cycle and returns them again,
//! usually with additional statistics. The [coordinator node](crate::nodes::coordinator) runs
//! the duties in order through [`run_duties`].

pub use self::{
    log_stats::log_stats,
    unload_unused::{reconcile, unload_unused_segments},
};
use crate::{
    cluster::ClusterView, events::EventSink, peon::PeonRegistry, stats::CoordinatorStats,
    used_segments::UsedSegments,
};
use std::{sync::Arc, time::Instant};

mod log_stats;
mod unload_unused;

/// A single step of a coordinator cycle.
pub type CoordinatorDuty = fn(CoordinatorRuntimeParams) -> CoordinatorRuntimeParams;

/// The duties of a coordinator cycle, in execution order.
pub const DEFAULT_DUTIES: &[CoordinatorDuty] = &[unload_unused_segments, log_stats];

/// The frozen inputs of a coordinator cycle and the statistics collected so far.
#[derive(Clone)]
pub struct CoordinatorRuntimeParams {
    /// The used segments at the start of the cycle.
    pub used_segments: UsedSegments,
    /// The servers and their held segments at the start of the cycle.
    pub cluster: Arc<ClusterView>,
    /// The load queues of all known servers.
    pub peons: Arc<PeonRegistry>,
    /// The statistics reported by the duties that already ran.
    pub stats: CoordinatorStats,
    /// Receives the events of all duties.
    pub events: Arc<dyn EventSink>,
    /// When the cycle started.
    pub start_time: Instant,
}

impl CoordinatorRuntimeParams {
    /// Creates the parameters of a new cycle with empty statistics.
    pub fn new(
        used_segments: UsedSegments,
        cluster: Arc<ClusterView>,
        peons: Arc<PeonRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            used_segments,
            cluster,
            peons,
            stats: CoordinatorStats::new(),
            events,
            start_time: Instant::now(),
        }
    }

    /// Adds the given statistics to the collected ones.
    pub fn with_stats(mut self, stats: &CoordinatorStats) -> Self {
        self.stats.accumulate(stats);
        self
    }
}

/// Runs the given duties in order, feeding the output of each into the next.
pub fn run_duties(
    params: CoordinatorRuntimeParams,
    duties: &[CoordinatorDuty],
) -> CoordinatorRuntimeParams {
    duties.iter().fold(params, |params, duty| duty(params))
}
