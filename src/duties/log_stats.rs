use super::CoordinatorRuntimeParams;
use crate::{
    events::{CoordinatorEvent, LoadQueueReport},
    stats::UNNEEDED_COUNT,
};

/// Reports the statistics of the cycle and the state of all load queues as events.
///
/// Also resets the failed load counters of the peons. Servers without a load queue are
/// skipped; reconciliation already reported them.
pub fn log_stats(params: CoordinatorRuntimeParams) -> CoordinatorRuntimeParams {
    params
        .stats
        .for_each_tiered_stat(UNNEEDED_COUNT, |tier, count| {
            params.events.emit(CoordinatorEvent::UnneededSegmentsRemoved {
                tier: tier.to_owned(),
                count,
                servers: params
                    .cluster
                    .servers_in_tier(tier)
                    .map(|servers| servers.len())
                    .unwrap_or_default(),
            });
        });

    log::debug!("Load queues after {:?}", params.start_time.elapsed());
    for holder in params.cluster.all_servers() {
        if let Some(peon) = params.peons.get(holder.server().name()) {
            let report = LoadQueueReport::collect(holder, peon);
            params.events.emit(CoordinatorEvent::LoadQueueState(report));
        }
    }

    params
}
