use super::LoadQueuePeon;
use crate::{cluster::ClusterView, server::ImmutableServer};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// The load queue peons of all known servers, keyed by server name.
#[derive(Debug, Default, Clone)]
pub struct PeonRegistry {
    peons: BTreeMap<String, Arc<LoadQueuePeon>>,
}

/// The changes made by [`PeonRegistry::sync_with_cluster`].
#[derive(Debug, Default)]
pub struct RegistryChanges {
    /// Peons that were created for newly discovered servers.
    pub added: Vec<Arc<LoadQueuePeon>>,
    /// Names of servers whose peons were stopped and removed.
    pub removed: Vec<String>,
}

impl PeonRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the peon of the given server.
    pub fn get(&self, server_name: &str) -> Option<&Arc<LoadQueuePeon>> {
        self.peons.get(server_name)
    }

    /// Registers a peon under its server name, replacing (and stopping) a previous one.
    pub fn insert(&mut self, peon: Arc<LoadQueuePeon>) {
        if let Some(old) = self.peons.insert(peon.server_name().to_owned(), peon) {
            old.stop();
        }
    }

    /// Stops and removes the peon of the given server.
    pub fn remove(&mut self, server_name: &str) -> Option<Arc<LoadQueuePeon>> {
        let peon = self.peons.remove(server_name)?;
        peon.stop();
        Some(peon)
    }

    /// The names of all servers that have a peon.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.peons.keys().map(String::as_str)
    }

    /// Iterates over all peons.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LoadQueuePeon>> + '_ {
        self.peons.values()
    }

    /// The number of registered peons.
    pub fn len(&self) -> usize {
        self.peons.len()
    }

    /// Returns `true` if no peon is registered.
    pub fn is_empty(&self) -> bool {
        self.peons.is_empty()
    }

    /// Makes the registry match the servers of the given cluster view.
    ///
    /// Servers without a peon get one from `create`. Peons of servers that are no longer part of
    /// the cluster are stopped, which fails their pending callbacks.
    pub fn sync_with_cluster(
        &mut self,
        cluster: &ClusterView,
        mut create: impl FnMut(&ImmutableServer) -> Arc<LoadQueuePeon>,
    ) -> RegistryChanges {
        let mut changes = RegistryChanges::default();
        let mut current = BTreeSet::new();

        for holder in cluster.all_servers() {
            let server: &ImmutableServer = holder.server();
            current.insert(server.name());
            if !self.peons.contains_key(server.name()) {
                let peon = create(server);
                self.peons.insert(server.name().to_owned(), peon.clone());
                changes.added.push(peon);
            }
        }

        let gone: Vec<String> = self
            .peons
            .keys()
            .filter(|name| !current.contains(name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            self.remove(&name);
            log::info!("Server {} left the cluster, stopped its load queue.", name);
            changes.removed.push(name);
        }

        changes
    }
}
