#![warn(missing_docs)]

//! Segment reconciliation engine for a tiered cluster of historical servers.
//!
//! The coordinator keeps the segments that are physically resident on historicals consistent
//! with the authoritative set of _used_ segments from metadata storage. Each cycle it takes a
//! frozen snapshot of the used segments and of the [cluster](cluster::ClusterView), runs the
//! [duty pipeline](duties), and submits drop commands for unneeded segments through the
//! per-server [load queue peons](peon::LoadQueuePeon). Peons deliver the commands to the
//! servers asynchronously, so a cycle never waits for the network.
//!
//! ## Usage Example
//!
//! Open three terminal windows and run the following commands in them (one per terminal
//! window):
//!
//! 1. `cargo run --bin historical -- example-config.yml --server historical-hot-1` to start a
//!    [historical node](nodes::historical) of the `hot` tier.
//! 2. `cargo run --bin historical -- example-config.yml --server historical-cold-1` to start a
//!    historical node of the `cold` tier.
//! 3. `cargo run --bin coordinator -- example-config.yml` to start the
//!    [coordinator node](nodes::coordinator).
//!
//! The coordinator polls the used segments file configured in `example-config.yml` and drops
//! every segment from the historicals that is not listed there.

pub use segment_coordinator_api::{
    CommandFailure, CommandResult, DataSegment, Interval, SegmentAction, SegmentId,
};

pub mod cluster;
pub mod config;
pub mod duties;
pub mod events;
pub mod messages;
pub mod metadata;
pub mod nodes;
pub mod peon;
pub mod server;
pub mod stats;
pub mod used_segments;

/// The tier that servers belong to if their config does not name one.
pub const DEFAULT_TIER: &str = "_default_tier";
