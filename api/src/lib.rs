//! Segment identity types shared between the coordinator and historical servers.
//!
//! The central types are [`SegmentId`] and [`DataSegment`]. Both are cheap to clone and are
//! compared by identity only, so sets of segments can be diffed without looking at mutable
//! metadata such as sizes or row counts.

use chrono::{DateTime, Utc};
use eyre::bail;
use std::{borrow::Borrow, cmp::Ordering, error::Error, fmt::Display, sync::Arc, time::Duration};

/// A half-open time range `[start, end)` covered by a segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "UncheckedInterval")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(serde::Deserialize)]
struct UncheckedInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<UncheckedInterval> for Interval {
    type Error = eyre::Report;

    fn try_from(interval: UncheckedInterval) -> eyre::Result<Self> {
        Self::try_new(interval.start, interval.end)
    }
}

impl Interval {
    /// Creates a new interval.
    ///
    /// Errors if `end` lies before `start`.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> eyre::Result<Self> {
        if end < start {
            bail!("interval end `{}` is before its start `{}`", end, start);
        }
        Ok(Self { start, end })
    }

    /// The inclusive start of the interval.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The exclusive end of the interval.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}",
            self.start.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.end.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )
    }
}

/// Uniquely identifies a segment across the cluster.
///
/// Ids are ordered by data source, interval, version and partition number, in this order.
/// The string form is `<dataSource>_<start>_<end>_<version>`, followed by `_<partition>` for
/// partitions other than `0`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub struct SegmentId {
    data_source: Arc<str>,
    interval: Interval,
    version: Arc<str>,
    #[serde(default)]
    partition_num: u32,
}

impl SegmentId {
    /// Creates a new segment id.
    pub fn new(
        data_source: impl Into<Arc<str>>,
        interval: Interval,
        version: impl Into<Arc<str>>,
        partition_num: u32,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            interval,
            version: version.into(),
            partition_num,
        }
    }

    /// The name of the data source that the segment belongs to.
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// The time range covered by the segment.
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The version of the segment, typically the creation time of its task.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The partition number within the interval and version.
    pub fn partition_num(&self) -> u32 {
        self.partition_num
    }
}

impl Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.data_source, self.interval, self.version)?;
        if self.partition_num != 0 {
            write!(f, "_{}", self.partition_num)?;
        }
        Ok(())
    }
}

/// An immutable unit of stored data, belonging to exactly one data source.
///
/// Equality, hashing and ordering only consider the [`SegmentId`]. The size and row count are
/// informational and may be unknown (`None`) when they could not be computed on the path that
/// produced the value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSegment {
    id: SegmentId,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    num_rows: Option<u64>,
}

impl DataSegment {
    /// Creates a new segment with the given size in bytes and an unknown row count.
    pub fn new(id: SegmentId, size: Option<u64>) -> Self {
        Self {
            id,
            size,
            num_rows: None,
        }
    }

    /// Sets the number of rows of the segment.
    pub fn with_num_rows(mut self, num_rows: u64) -> Self {
        self.num_rows = Some(num_rows);
        self
    }

    /// The unique id of the segment.
    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    /// Shorthand for `self.id().data_source()`.
    pub fn data_source(&self) -> &str {
        self.id.data_source()
    }

    /// The size of the segment in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// The size of the segment in bytes, treating an unknown size as zero.
    pub fn size_or_zero(&self) -> u64 {
        self.size.unwrap_or_default()
    }

    /// The number of rows in the segment, if known.
    pub fn num_rows(&self) -> Option<u64> {
        self.num_rows
    }
}

impl PartialEq for DataSegment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataSegment {}

impl std::hash::Hash for DataSegment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for DataSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Borrow<SegmentId> for DataSegment {
    fn borrow(&self) -> &SegmentId {
        &self.id
    }
}

impl Display for DataSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.id, f)
    }
}

/// The kind of change that a command applies to a server.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum SegmentAction {
    /// Download and serve the segment.
    Load,
    /// Stop serving the segment and remove it from the local cache.
    Drop,
}

impl Display for SegmentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => write!(f, "LOAD"),
            Self::Drop => write!(f, "DROP"),
        }
    }
}

/// Describes why a load or drop command did not complete successfully.
///
/// Sent back by servers in command responses and passed to completion callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CommandFailure {
    /// The server refused to execute the command.
    Rejected(String),
    /// The server did not acknowledge the command in time.
    Timeout(Duration),
    /// The command could not be delivered or the response could not be read.
    Transport(String),
    /// The queue that owned the command was stopped before the command finished.
    PeonStopped,
}

impl Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "The server rejected the command: {}", reason),
            Self::Timeout(after) => write!(f, "The command timed out after {:?}.", after),
            Self::Transport(reason) => write!(f, "Failed to deliver the command: {}", reason),
            Self::PeonStopped => write!(f, "The load queue was stopped."),
        }
    }
}

impl Error for CommandFailure {}

impl From<serde_json::Error> for CommandFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// The outcome of a single load or drop command.
pub type CommandResult = Result<(), CommandFailure>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn interval(start_day: u32, end_day: u32) -> Interval {
        Interval::try_new(
            Utc.with_ymd_and_hms(2024, 1, start_day, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, end_day, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn segment_id_display() {
        let id = SegmentId::new("wikipedia", interval(1, 2), "v1", 0);
        assert_eq!(
            id.to_string(),
            "wikipedia_2024-01-01T00:00:00.000Z_2024-01-02T00:00:00.000Z_v1"
        );

        let id = SegmentId::new("wikipedia", interval(1, 2), "v1", 3);
        assert_eq!(
            id.to_string(),
            "wikipedia_2024-01-01T00:00:00.000Z_2024-01-02T00:00:00.000Z_v1_3"
        );
    }

    #[test]
    fn segment_ids_are_ordered() {
        let a = SegmentId::new("a", interval(2, 3), "v1", 0);
        let b = SegmentId::new("b", interval(1, 2), "v1", 0);
        let a_early = SegmentId::new("a", interval(1, 2), "v2", 0);
        let a_early_p1 = SegmentId::new("a", interval(1, 2), "v2", 1);

        let sorted: Vec<_> = vec![b.clone(), a.clone(), a_early_p1.clone(), a_early.clone()]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        assert_eq!(sorted, vec![a_early, a_early_p1, a, b]);
    }

    #[test]
    fn segment_equality_ignores_metadata() {
        let id = SegmentId::new("wikipedia", interval(1, 2), "v1", 0);
        let small = DataSegment::new(id.clone(), Some(10));
        let large = DataSegment::new(id.clone(), Some(1000)).with_num_rows(5);
        assert_eq!(small, large);

        let set: BTreeSet<_> = vec![small, large].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&id));
    }

    #[test]
    fn invalid_interval() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(Interval::try_new(start, end).is_err());

        let err = serde_json::from_str::<Interval>(
            r#"{"start":"2024-01-02T00:00:00Z","end":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("before its start"));

        let parsed: Interval = serde_json::from_str(
            r#"{"start":"2024-01-01T00:00:00Z","end":"2024-01-02T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed, interval(1, 2));
    }

    #[test]
    fn segment_serde() {
        let segment = DataSegment::new(SegmentId::new("ds", interval(1, 2), "v1", 2), Some(42));
        let serialized = serde_json::to_string(&segment).unwrap();
        let deserialized: DataSegment = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.id(), segment.id());
        assert_eq!(deserialized.size(), Some(42));
        assert_eq!(deserialized.num_rows(), None);
    }
}
