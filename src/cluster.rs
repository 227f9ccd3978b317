//! The tiered view of all servers of the cluster.

use crate::server::ImmutableServer;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Wraps a server snapshot and orders it by its current load.
///
/// Holders compare by current size in bytes (ascending), then by server name. This gives a
/// deterministic order within a tier that starts with the least loaded server.
#[derive(Debug, Clone)]
pub struct ServerHolder {
    server: Arc<ImmutableServer>,
    curr_size: u64,
}

impl ServerHolder {
    /// Wraps the given server snapshot.
    pub fn new(server: Arc<ImmutableServer>) -> Self {
        let curr_size = server.curr_size();
        Self { server, curr_size }
    }

    /// The wrapped server snapshot.
    pub fn server(&self) -> &Arc<ImmutableServer> {
        &self.server
    }

    /// The number of bytes held by the server when the snapshot was taken.
    pub fn curr_size(&self) -> u64 {
        self.curr_size
    }

    /// The number of bytes that the server could still hold.
    pub fn available_size(&self) -> u64 {
        self.server.max_size().saturating_sub(self.curr_size)
    }

    /// The used share of the server's capacity, in percent.
    pub fn percent_used(&self) -> f64 {
        if self.server.max_size() == 0 {
            return 100.0;
        }
        self.curr_size as f64 / self.server.max_size() as f64 * 100.0
    }
}

impl PartialEq for ServerHolder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ServerHolder {}

impl PartialOrd for ServerHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.curr_size
            .cmp(&other.curr_size)
            .then_with(|| self.server.name().cmp(other.server.name()))
    }
}

/// All servers of the cluster, grouped by tier.
///
/// Tiers are iterated in lexicographic order of their names. Within a tier, servers are
/// iterated in [`ServerHolder`] order. The view is an immutable snapshot once built; a new view
/// is assembled for every coordinator cycle.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    historicals: BTreeMap<String, BTreeSet<ServerHolder>>,
}

impl ClusterView {
    /// Creates an empty cluster view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server to the tier it reports.
    ///
    /// Server names are expected to be unique. Adding a second snapshot of the same server with
    /// a different size keeps both entries.
    pub fn add_server(&mut self, server: impl Into<Arc<ImmutableServer>>) {
        let holder = ServerHolder::new(server.into());
        self.historicals
            .entry(holder.server().tier().to_owned())
            .or_default()
            .insert(holder);
    }

    /// The names of all tiers that contain at least one server, in iteration order.
    pub fn tiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.historicals.keys().map(String::as_str)
    }

    /// Returns `true` if at least one server belongs to the given tier.
    pub fn has_tier(&self, tier: &str) -> bool {
        self.historicals.contains_key(tier)
    }

    /// The servers of the given tier in priority order, or `None` for unknown tiers.
    pub fn servers_in_tier(&self, tier: &str) -> Option<&BTreeSet<ServerHolder>> {
        self.historicals.get(tier)
    }

    /// Iterates over all tiers and their servers in iteration order.
    pub fn sorted_servers_by_tier(
        &self,
    ) -> impl Iterator<Item = (&str, &BTreeSet<ServerHolder>)> + '_ {
        self.historicals
            .iter()
            .map(|(tier, servers)| (tier.as_str(), servers))
    }

    /// Iterates over all servers of all tiers.
    pub fn all_servers(&self) -> impl Iterator<Item = &ServerHolder> + '_ {
        self.historicals.values().flatten()
    }

    /// The total number of servers.
    pub fn server_count(&self) -> usize {
        self.historicals.values().map(BTreeSet::len).sum()
    }

    /// Returns `true` if the view contains no servers.
    pub fn is_empty(&self) -> bool {
        self.historicals.is_empty()
    }
}

impl FromIterator<ImmutableServer> for ClusterView {
    fn from_iter<T: IntoIterator<Item = ImmutableServer>>(iter: T) -> Self {
        let mut cluster = Self::new();
        for server in iter {
            cluster.add_server(server);
        }
        cluster
    }
}
