//! Mergeable counters that duties use to report what they did.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Counts the segments that a duty queued for removal, keyed by tier.
pub const UNNEEDED_COUNT: &str = "unneededCount";

/// Counters keyed by statistic name and tier, data source or nothing.
///
/// Every duty produces a fresh instance; the coordinator driver merges them with
/// [`accumulate`](Self::accumulate). Iteration order is deterministic (lexicographic by
/// statistic name, then by tier or data source name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorStats {
    tiered: BTreeMap<String, BTreeMap<String, i64>>,
    data_source: BTreeMap<String, BTreeMap<String, i64>>,
    global: BTreeMap<String, i64>,
}

impl CoordinatorStats {
    /// Creates an empty stats object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if at least one tiered statistic was recorded.
    pub fn has_per_tier_stats(&self) -> bool {
        !self.tiered.is_empty()
    }

    /// Returns `true` if at least one per-data-source statistic was recorded.
    pub fn has_per_data_source_stats(&self) -> bool {
        !self.data_source.is_empty()
    }

    /// Returns `true` if nothing was recorded at all.
    pub fn is_empty(&self) -> bool {
        self.tiered.is_empty() && self.data_source.is_empty() && self.global.is_empty()
    }

    /// The tiers for which the given statistic was recorded.
    pub fn tiers(&self, stat: &str) -> BTreeSet<&str> {
        self.tiered
            .get(stat)
            .map(|tiers| tiers.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The value of a tiered statistic, `0` if it was never recorded.
    pub fn tiered_stat(&self, stat: &str, tier: &str) -> i64 {
        self.tiered
            .get(stat)
            .and_then(|tiers| tiers.get(tier))
            .copied()
            .unwrap_or_default()
    }

    /// Calls `f` with the tier and value of every recorded entry of the given statistic.
    pub fn for_each_tiered_stat(&self, stat: &str, mut f: impl FnMut(&str, i64)) {
        if let Some(tiers) = self.tiered.get(stat) {
            for (tier, &value) in tiers {
                f(tier, value);
            }
        }
    }

    /// Adds `value` to the given tiered statistic.
    pub fn add_to_tiered_stat(&mut self, stat: &str, tier: &str, value: i64) {
        *self
            .tiered
            .entry(stat.to_owned())
            .or_default()
            .entry(tier.to_owned())
            .or_default() += value;
    }

    /// The value of a per-data-source statistic, `0` if it was never recorded.
    pub fn data_source_stat(&self, stat: &str, data_source: &str) -> i64 {
        self.data_source
            .get(stat)
            .and_then(|sources| sources.get(data_source))
            .copied()
            .unwrap_or_default()
    }

    /// Calls `f` with the data source and value of every entry of the given statistic.
    pub fn for_each_data_source_stat(&self, stat: &str, mut f: impl FnMut(&str, i64)) {
        if let Some(sources) = self.data_source.get(stat) {
            for (data_source, &value) in sources {
                f(data_source, value);
            }
        }
    }

    /// Adds `value` to the given per-data-source statistic.
    pub fn add_to_data_source_stat(&mut self, stat: &str, data_source: &str, value: i64) {
        *self
            .data_source
            .entry(stat.to_owned())
            .or_default()
            .entry(data_source.to_owned())
            .or_default() += value;
    }

    /// The value of a global statistic, `0` if it was never recorded.
    pub fn global_stat(&self, stat: &str) -> i64 {
        self.global.get(stat).copied().unwrap_or_default()
    }

    /// Adds `value` to the given global statistic.
    pub fn add_to_global_stat(&mut self, stat: &str, value: i64) {
        *self.global.entry(stat.to_owned()).or_default() += value;
    }

    /// Adds all counters of `other` to `self`.
    pub fn accumulate(&mut self, other: &CoordinatorStats) {
        for (stat, tiers) in &other.tiered {
            for (tier, &value) in tiers {
                self.add_to_tiered_stat(stat, tier, value);
            }
        }
        for (stat, sources) in &other.data_source {
            for (data_source, &value) in sources {
                self.add_to_data_source_stat(stat, data_source, value);
            }
        }
        for (stat, &value) in &other.global {
            self.add_to_global_stat(stat, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tiered_stats() {
        let mut stats = CoordinatorStats::new();
        assert!(stats.is_empty());
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 0);

        stats.add_to_tiered_stat(UNNEEDED_COUNT, "hot", 1);
        stats.add_to_tiered_stat(UNNEEDED_COUNT, "hot", 2);
        stats.add_to_tiered_stat(UNNEEDED_COUNT, "cold", 1);

        assert!(stats.has_per_tier_stats());
        assert!(!stats.has_per_data_source_stats());
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "hot"), 3);
        assert_eq!(stats.tiered_stat(UNNEEDED_COUNT, "cold"), 1);
        assert_eq!(
            stats.tiers(UNNEEDED_COUNT).into_iter().collect::<Vec<_>>(),
            vec!["cold", "hot"]
        );

        let mut seen = Vec::new();
        stats.for_each_tiered_stat(UNNEEDED_COUNT, |tier, value| {
            seen.push((tier.to_owned(), value))
        });
        assert_eq!(seen, vec![("cold".to_owned(), 1), ("hot".to_owned(), 3)]);
    }

    #[test]
    fn accumulate() {
        let mut first = CoordinatorStats::new();
        first.add_to_tiered_stat(UNNEEDED_COUNT, "hot", 1);
        first.add_to_global_stat("cycles", 1);
        first.add_to_data_source_stat("dropped", "wiki", 2);

        let mut second = CoordinatorStats::new();
        second.add_to_tiered_stat(UNNEEDED_COUNT, "hot", 2);
        second.add_to_tiered_stat(UNNEEDED_COUNT, "cold", 4);
        second.add_to_global_stat("cycles", 1);
        second.add_to_data_source_stat("dropped", "logs", 1);

        first.accumulate(&second);

        assert_eq!(first.tiered_stat(UNNEEDED_COUNT, "hot"), 3);
        assert_eq!(first.tiered_stat(UNNEEDED_COUNT, "cold"), 4);
        assert_eq!(first.global_stat("cycles"), 2);
        assert_eq!(first.data_source_stat("dropped", "wiki"), 2);
        assert_eq!(first.data_source_stat("dropped", "logs"), 1);

        let mut sources = Vec::new();
        first.for_each_data_source_stat("dropped", |ds, v| sources.push((ds.to_owned(), v)));
        assert_eq!(sources, vec![("logs".to_owned(), 1), ("wiki".to_owned(), 2)]);

        // merging an empty object changes nothing
        let before = first.clone();
        first.accumulate(&CoordinatorStats::new());
        assert_eq!(first, before);
    }
}
