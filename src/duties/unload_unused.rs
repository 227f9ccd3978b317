use super::CoordinatorRuntimeParams;
use crate::{
    cluster::ClusterView,
    events::{CoordinatorEvent, EventSink},
    peon::{no_op_callback, EnqueueOutcome, PeonRegistry},
    stats::{CoordinatorStats, UNNEEDED_COUNT},
    used_segments::UsedSegments,
};

/// Drops all segments from the historicals that are no longer used.
///
/// Skips the whole cycle unless the used segments are populated. Otherwise an empty used set
/// that was not polled yet (or a metadata store that was wiped) would drop every segment of
/// the cluster.
pub fn unload_unused_segments(params: CoordinatorRuntimeParams) -> CoordinatorRuntimeParams {
    let stats = reconcile(
        &params.used_segments,
        &params.cluster,
        &params.peons,
        params.events.as_ref(),
    );
    params.with_stats(&stats)
}

/// Queues a drop on every server for each held segment that is not in `used_segments`.
///
/// Segments that are already queued or in flight for dropping on a server are skipped, so
/// running this repeatedly on an unchanged snapshot queues every drop only once. Returns the
/// number of queued drops as the [`UNNEEDED_COUNT`] statistic of each tier.
pub fn reconcile(
    used_segments: &UsedSegments,
    cluster: &ClusterView,
    peons: &PeonRegistry,
    events: &dyn EventSink,
) -> CoordinatorStats {
    let mut stats = CoordinatorStats::new();

    match used_segments {
        UsedSegments::Unknown => {
            events.emit(CoordinatorEvent::UsedSegmentsUnknown);
            return stats;
        }
        UsedSegments::Empty => {
            events.emit(CoordinatorEvent::NoUsedSegments);
            return stats;
        }
        UsedSegments::Populated(_) => {}
    }

    for (tier, holders) in cluster.sorted_servers_by_tier() {
        for holder in holders {
            let server = holder.server();
            let peon = match peons.get(server.name()) {
                Some(peon) => peon,
                None => {
                    events.emit(CoordinatorEvent::MissingPeon {
                        server: server.name().to_owned(),
                        tier: tier.to_owned(),
                    });
                    continue;
                }
            };

            for segment in server.segments() {
                if used_segments.contains(segment.id()) || peon.is_dropping(segment.id()) {
                    continue;
                }
                if peon.enqueue_drop(segment.clone(), no_op_callback()) == EnqueueOutcome::Queued {
                    stats.add_to_tiered_stat(UNNEEDED_COUNT, tier, 1);
                    events.emit(CoordinatorEvent::dropping(segment, server.name(), tier));
                }
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LoadQueueConfig,
        events::RecordingEventSink,
        peon::{test_util::MockClient, LoadQueuePeon},
        server::{
            test_util::{addr, segment, segment_of},
            ImmutableServer,
        },
        DataSegment,
    };
    use pretty_assertions::assert_eq;
    use std::{collections::BTreeSet, sync::Arc};

    struct Fixture {
        cluster: ClusterView,
        peons: PeonRegistry,
        events: RecordingEventSink,
    }

    impl Fixture {
        fn new(servers: Vec<ImmutableServer>) -> Self {
            let mut peons = PeonRegistry::new();
            for server in &servers {
                peons.insert(Arc::new(LoadQueuePeon::new(
                    server.name(),
                    LoadQueueConfig::default(),
                    Arc::new(MockClient::succeeding()),
                )));
            }
            Self {
                cluster: servers.into_iter().collect(),
                peons,
                events: RecordingEventSink::new(),
            }
        }

        /// H1 in tier `hot` holds s1 and s2, C1 in tier `cold` holds s3.
        fn hot_and_cold() -> Self {
            Self::new(vec![
                ImmutableServer::new("H1", addr(1), "hot", 1000)
                    .with_segments(vec![segment(1, 10), segment(2, 20)]),
                ImmutableServer::new("C1", addr(2), "cold", 1000)
                    .with_segments(vec![segment(3, 30)]),
            ])
        }

        fn reconcile(&self, used: &UsedSegments) -> CoordinatorStats {
            reconcile(used, &self.cluster, &self.peons, &self.events)
        }

        fn drops(&self, server: &str) -> BTreeSet<DataSegment> {
            self.peons.get(server).unwrap().segments_to_drop()
        }
    }

    fn used(segments: Vec<DataSegment>) -> UsedSegments {
        segments.into_iter().collect()
    }

    #[test]
    fn drops_unused_segments_per_tier() {
        let fixture = Fixture::hot_and_cold();

        let stats = fixture.reconcile(&used(vec![segment(1, 10)]));

        assert_eq!(fixture.drops("H1"), BTreeSet::from([segment(2, 0)]));
        assert_eq!(fixture.drops("C1"), BTreeSet::from([segment(3, 0)]));
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 1);
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "cold"), 1);
        assert_eq!(stats.tiers(UNNEEDED_COUNT), BTreeSet::from(["cold", "hot"]));
        assert_eq!(
            fixture.events.take(),
            vec![
                CoordinatorEvent::dropping(&segment(3, 30), "C1", "cold"),
                CoordinatorEvent::dropping(&segment(2, 20), "H1", "hot"),
            ]
        );
    }

    #[test]
    fn skips_when_used_segments_are_empty() {
        let fixture = Fixture::hot_and_cold();

        let stats = fixture.reconcile(&UsedSegments::Empty);

        assert!(stats.is_empty());
        assert!(fixture.drops("H1").is_empty());
        assert!(fixture.drops("C1").is_empty());
        assert_eq!(fixture.events.take(), vec![CoordinatorEvent::NoUsedSegments]);
    }

    #[test]
    fn skips_when_used_segments_are_unknown() {
        let fixture = Fixture::hot_and_cold();

        let stats = fixture.reconcile(&UsedSegments::Unknown);

        assert!(stats.is_empty());
        assert!(fixture.drops("H1").is_empty());
        assert_eq!(
            fixture.events.take(),
            vec![CoordinatorEvent::UsedSegmentsUnknown]
        );
    }

    #[test]
    fn already_queued_drops_are_not_counted() {
        let fixture = Fixture::new(vec![ImmutableServer::new("H1", addr(1), "hot", 1000)
            .with_segments(vec![segment(1, 10), segment(2, 20)])]);
        let peon = fixture.peons.get("H1").unwrap();
        peon.enqueue_drop(segment(2, 20), no_op_callback());

        let stats = fixture.reconcile(&used(vec![segment(1, 10)]));

        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 0);
        assert!(stats.is_empty());
        assert_eq!(peon.number_of_segments_in_queue(), 1);
    }

    #[test]
    fn repeated_cycles_queue_each_drop_once() {
        let fixture = Fixture::hot_and_cold();
        let used = used(vec![segment(1, 10)]);

        let first = fixture.reconcile(&used);
        let second = fixture.reconcile(&used);

        assert_eq!(first.tiered_stat(UNNEEDED_COUNT, "hot"), 1);
        assert!(second.is_empty());
        assert_eq!(fixture.peons.get("H1").unwrap().number_of_segments_in_queue(), 1);
        assert_eq!(fixture.peons.get("C1").unwrap().number_of_segments_in_queue(), 1);
    }

    #[test]
    fn removed_segments_are_not_dropped_again() {
        let fixture = Fixture::hot_and_cold();
        let used = used(vec![segment(1, 10)]);
        fixture.reconcile(&used);

        // the drops complete and the servers report their new inventory
        for peon in fixture.peons.iter() {
            smol::block_on(futures::future::join_all(peon.drain_and_dispatch()));
            assert_eq!(peon.number_of_segments_in_queue(), 0);
        }
        let after = Fixture {
            cluster: vec![
                ImmutableServer::new("H1", addr(1), "hot", 1000).with_segments(vec![segment(1, 10)]),
                ImmutableServer::new("C1", addr(2), "cold", 1000),
            ]
            .into_iter()
            .collect(),
            ..fixture
        };

        let stats = after.reconcile(&used);

        assert!(stats.is_empty());
        assert!(after.drops("H1").is_empty());
        assert!(after.drops("C1").is_empty());
    }

    #[test]
    fn stats_stay_in_their_tier() {
        let fixture = Fixture::new(vec![
            ImmutableServer::new("H1", addr(1), "hot", 1000)
                .with_segments(vec![segment(1, 10), segment(2, 10), segment(3, 10)]),
            ImmutableServer::new("H2", addr(2), "hot", 1000).with_segments(vec![segment(4, 10)]),
            ImmutableServer::new("C1", addr(3), "cold", 1000)
                .with_segments(vec![segment_of("other", 1, 10)]),
        ]);

        let stats = fixture.reconcile(&used(vec![segment(1, 10)]));

        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 3);
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "cold"), 1);
    }

    #[test]
    fn servers_without_peon_are_skipped() {
        let mut fixture = Fixture::hot_and_cold();
        fixture.peons.remove("H1");

        let stats = fixture.reconcile(&used(vec![segment(1, 10)]));

        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 0);
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "cold"), 1);
        assert_eq!(
            fixture.events.take(),
            vec![
                CoordinatorEvent::dropping(&segment(3, 30), "C1", "cold"),
                CoordinatorEvent::MissingPeon {
                    server: "H1".into(),
                    tier: "hot".into()
                },
            ]
        );
    }

    #[test]
    fn duty_adds_stats_to_params() {
        let fixture = Fixture::hot_and_cold();
        let params = CoordinatorRuntimeParams::new(
            used(vec![segment(1, 10)]),
            Arc::new(fixture.cluster),
            Arc::new(fixture.peons),
            Arc::new(fixture.events),
        );

        let params = unload_unused_segments(params);

        assert_eq!(params.stats.tiered_stat(UNNEEDED_COUNT, "hot"), 1);
        assert_eq!(params.stats.tiered_stat(UNNEEDED_COUNT, "cold"), 1);
    }
}
