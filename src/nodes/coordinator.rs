//! The coordinator node that periodically reconciles the cluster.

use crate::{
    cluster::ClusterView,
    config::{Config, LoadQueueConfig},
    duties::{run_duties, CoordinatorDuty, CoordinatorRuntimeParams, DEFAULT_DUTIES},
    events::{EventSink, LogEventSink},
    metadata::UsedSegmentsProvider,
    peon::{LoadQueuePeon, PeonRegistry, SegmentServerClient, TcpServerClient},
    stats::CoordinatorStats,
};
use futures::{future, FutureExt};
use std::{sync::Arc, time::Duration};

/// Starts the coordinator node based on the given config.
///
/// Runs until the process is killed.
pub fn run(config: &Config) -> eyre::Result<()> {
    config.validate()?;
    let servers = config
        .servers
        .iter()
        .map(|server| {
            let client: Arc<dyn SegmentServerClient> =
                Arc::new(TcpServerClient::new(server.address));
            (server.name.clone(), client)
        })
        .collect();
    let mut node = CoordinatorNode::new(
        UsedSegmentsProvider::new(&config.coordinator.used_segments_file),
        servers,
        config.load_queue,
        config.coordinator.inventory_timeout(),
    );
    let period = config.coordinator.period();

    log::info!(
        "Coordinator starting with {} servers, running every {:?}",
        config.servers.len(),
        period
    );
    smol::block_on(async {
        loop {
            node.run_cycle().await;
            smol::Timer::after(period).await;
        }
    });
    Ok(())
}

/// The state that the coordinator keeps across cycles.
pub struct CoordinatorNode {
    used_segments: UsedSegmentsProvider,
    servers: Vec<(String, Arc<dyn SegmentServerClient>)>,
    load_queue_config: LoadQueueConfig,
    inventory_timeout: Duration,
    peons: PeonRegistry,
    events: Arc<dyn EventSink>,
    duties: Vec<CoordinatorDuty>,
    run_stats: CoordinatorStats,
    cycles: u64,
}

impl CoordinatorNode {
    /// Creates a coordinator for the given servers, identified by name.
    pub fn new(
        used_segments: UsedSegmentsProvider,
        servers: Vec<(String, Arc<dyn SegmentServerClient>)>,
        load_queue_config: LoadQueueConfig,
        inventory_timeout: Duration,
    ) -> Self {
        Self {
            used_segments,
            servers,
            load_queue_config,
            inventory_timeout,
            peons: PeonRegistry::new(),
            events: Arc::new(LogEventSink),
            duties: DEFAULT_DUTIES.to_vec(),
            run_stats: CoordinatorStats::new(),
            cycles: 0,
        }
    }

    /// Replaces the sink that receives the events of all duties.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The load queues of all servers that answered the last inventory request.
    pub fn peons(&self) -> &PeonRegistry {
        &self.peons
    }

    /// The statistics of all cycles so far.
    pub fn run_stats(&self) -> &CoordinatorStats {
        &self.run_stats
    }

    /// The number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs a single coordinator cycle and returns its statistics.
    ///
    /// Polls the used segments, fetches the inventory of all servers, starts load queues for
    /// new servers, stops the load queues of servers that did not answer, and runs all duties.
    pub async fn run_cycle(&mut self) -> CoordinatorStats {
        if let Err(err) = self.used_segments.poll().await {
            log::warn!("Failed to poll used segments: {:?}", err);
        }
        let cluster = Arc::new(self.fetch_cluster().await);

        let clients = &self.servers;
        let load_queue_config = self.load_queue_config;
        let changes = self.peons.sync_with_cluster(&cluster, |server| {
            let client: Arc<dyn SegmentServerClient> =
                match clients.iter().find(|(name, _)| name == server.name()) {
                    Some((_, client)) => client.clone(),
                    None => Arc::new(TcpServerClient::new(server.address())),
                };
            Arc::new(LoadQueuePeon::new(server.name(), load_queue_config, client))
        });
        for peon in changes.added {
            smol::spawn(peon.run()).detach();
        }

        let params = CoordinatorRuntimeParams::new(
            self.used_segments.snapshot(),
            cluster,
            Arc::new(self.peons.clone()),
            self.events.clone(),
        );
        let params = run_duties(params, &self.duties);

        self.run_stats.accumulate(&params.stats);
        self.cycles += 1;
        params.stats
    }

    async fn fetch_cluster(&self) -> ClusterView {
        let timeout = self.inventory_timeout;
        let requests = self.servers.iter().map(|(name, client)| {
            let inventory = client.inventory();
            async move {
                let timed_out = async move {
                    smol::Timer::after(timeout).await;
                    Err(eyre::eyre!("timed out after {:?}", timeout))
                };
                match smol::future::or(inventory, timed_out).await {
                    Ok(server) if server.name() == name.as_str() => Some(server),
                    Ok(server) => {
                        log::warn!(
                            "Server {} reported itself as {}, leaving it out of this cycle",
                            name,
                            server.name()
                        );
                        None
                    }
                    Err(err) => {
                        log::warn!(
                            "Failed to fetch inventory of server {}, leaving it out of this \
                            cycle: {:?}",
                            name,
                            err
                        );
                        None
                    }
                }
            }
            .boxed()
        });

        future::join_all(requests)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{CoordinatorEvent, RecordingEventSink},
        messages::SegmentCommand,
        server::{
            test_util::{addr, segment},
            ImmutableServer,
        },
        stats::UNNEEDED_COUNT,
        CommandResult,
    };
    use futures::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use std::{path::PathBuf, sync::Mutex};

    /// Serves a fixed inventory and never acknowledges commands.
    struct StaticServer {
        inventory: Mutex<Option<ImmutableServer>>,
    }

    impl StaticServer {
        fn new(inventory: Option<ImmutableServer>) -> Arc<Self> {
            Arc::new(Self {
                inventory: Mutex::new(inventory),
            })
        }
    }

    impl SegmentServerClient for StaticServer {
        fn execute(&self, _command: SegmentCommand) -> BoxFuture<'static, CommandResult> {
            future::pending().boxed()
        }

        fn inventory(&self) -> BoxFuture<'static, eyre::Result<ImmutableServer>> {
            let inventory = self.inventory.lock().unwrap().clone();
            future::ready(inventory.ok_or_else(|| eyre::eyre!("server is down"))).boxed()
        }
    }

    fn temp_file(content: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("used-segments-{}.yml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    const USED: &str = r#"
- id:
    data-source: test
    interval:
      start: 2024-01-01T00:00:00Z
      end: 2024-01-02T00:00:00Z
    version: v1
  size: 10
"#;

    #[test]
    fn cycle_drops_unused_segments() {
        let path = temp_file(USED);
        let hot = StaticServer::new(Some(
            ImmutableServer::new("h1", addr(1), "hot", 100)
                .with_segments(vec![segment(1, 10), segment(2, 10)]),
        ));
        let down = StaticServer::new(None);
        let events = Arc::new(RecordingEventSink::new());
        let mut node = CoordinatorNode::new(
            UsedSegmentsProvider::new(&path),
            vec![
                ("h1".to_owned(), hot.clone() as Arc<dyn SegmentServerClient>),
                ("h2".to_owned(), down as Arc<dyn SegmentServerClient>),
            ],
            LoadQueueConfig::default(),
            Duration::from_secs(1),
        )
        .with_event_sink(events.clone());

        let stats = smol::block_on(node.run_cycle());
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 1);
        let events = events.take();
        assert_eq!(
            events[..2].to_vec(),
            vec![
                CoordinatorEvent::dropping(&segment(2, 10), "h1", "hot"),
                CoordinatorEvent::UnneededSegmentsRemoved {
                    tier: "hot".to_owned(),
                    count: 1,
                    servers: 1,
                },
            ]
        );
        match &events[2..] {
            [CoordinatorEvent::LoadQueueState(report)] => {
                assert_eq!(report.server, "h1");
                assert_eq!(report.to_drop, 1);
                assert_eq!(report.served_bytes, 20);
            }
            other => panic!("unexpected events {:?}", other),
        }
        // unreachable servers get no load queue
        assert_eq!(node.peons().names().collect::<Vec<_>>(), vec!["h1"]);

        let peon = node.peons().get("h1").unwrap().clone();
        assert!(peon.is_dropping(segment(2, 0).id()));

        // the drop is still pending, so the next cycle does not queue it again
        let stats = smol::block_on(node.run_cycle());
        assert!(stats.is_empty());
        assert_eq!(node.run_stats().tiered_stat(UNNEEDED_COUNT, "hot"), 1);
        assert_eq!(node.cycles(), 2);

        // a server that stops answering loses its load queue
        *hot.inventory.lock().unwrap() = None;
        smol::block_on(node.run_cycle());
        assert!(node.peons().is_empty());
        assert!(peon.is_stopped());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zero_outstanding_commands_fail_the_run() {
        let mut config: Config = serde_yaml::from_str(
            "\
coordinator:
  period-secs: 60
  used-segments-file: /nonexistent/used-segments.yml
  inventory-timeout-secs: 5
load-queue:
  max-outstanding: 0
  command-timeout-millis: 500
  drain-period-millis: 100
servers: []
",
        )
        .unwrap();
        assert!(run(&config).is_err());

        config.load_queue.max_outstanding = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn no_drops_before_used_segments_are_known() {
        let server = StaticServer::new(Some(
            ImmutableServer::new("h1", addr(1), "hot", 100).with_segments(vec![segment(1, 10)]),
        ));
        let events = Arc::new(RecordingEventSink::new());
        let mut node = CoordinatorNode::new(
            UsedSegmentsProvider::new("/nonexistent/used-segments.yml"),
            vec![("h1".to_owned(), server as Arc<dyn SegmentServerClient>)],
            LoadQueueConfig::default(),
            Duration::from_secs(1),
        )
        .with_event_sink(events.clone());

        let stats = smol::block_on(node.run_cycle());

        assert!(stats.is_empty());
        let events = events.take();
        assert_eq!(events[0], CoordinatorEvent::UsedSegmentsUnknown);
        assert!(matches!(
            &events[1..],
            [CoordinatorEvent::LoadQueueState(_)]
        ));
        assert_eq!(
            node.peons().get("h1").unwrap().number_of_segments_in_queue(),
            0
        );
    }
}
